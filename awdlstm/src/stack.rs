//! Multi-layer stack of regularized recurrent cells.

use awdlstm_tch_ext::PathExt;
use log::debug;
use tch::{Kind, Tensor};

use crate::cells::{single_cell, CellSpec, LayerState, RegularizedCell};
use crate::config::{CellParams, CellType};
use crate::error::{EncoderError, ShapeError};
use crate::module::RecurrentModule;

/// Parameters and dropout of one group of layers.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub params: CellParams,
    pub input_keep_prob: f64,
    pub output_keep_prob: f64,
}

/// Cell stack configuration.
#[derive(Clone, Debug)]
pub struct StackConfig {
    pub cell_type: CellType,

    /// Size of the inputs of the first layer.
    pub input_size: i64,

    pub num_layers: usize,

    /// Configuration of all layers except the last.
    pub body: LayerConfig,

    /// Configuration of the last layer.
    pub last: LayerConfig,

    pub residual: bool,
    pub variational: bool,
}

/// State of all layers in a cell stack.
#[derive(Debug)]
pub struct StackState {
    pub layers: Vec<LayerState>,
}

impl StackState {
    /// Hidden states of all layers.
    ///
    /// Returns a tensor of shape `[num_layers, batch_size, num_units]`.
    /// Fails when the layers have different sizes.
    pub fn stacked_hidden(&self) -> Result<Tensor, EncoderError> {
        let hidden = self
            .layers
            .iter()
            .map(|layer| &layer.cell.hidden)
            .collect::<Vec<_>>();
        Ok(Tensor::f_stack(&hidden, 0)?)
    }
}

/// Stack of recurrent cells.
///
/// The output of each layer is the input of the next layer.
#[derive(Debug)]
pub struct CellStack {
    layers: Vec<RegularizedCell>,
}

impl CellStack {
    /// Construct a cell stack.
    ///
    /// The variables of layer *i* are stored below `cell_{i}`.
    pub fn new(vs: &PathExt, config: &StackConfig) -> Result<Self, EncoderError> {
        let mut layers = Vec::with_capacity(config.num_layers);
        let mut input_size = config.input_size;

        for layer in 0..config.num_layers {
            let layer_config = if layer + 1 == config.num_layers {
                &config.last
            } else {
                &config.body
            };

            let spec = CellSpec {
                cell_type: config.cell_type,
                params: &layer_config.params,
                input_keep_prob: layer_config.input_keep_prob,
                output_keep_prob: layer_config.output_keep_prob,
                residual: config.residual,
                variational: config.variational,
            };

            let cell = single_cell(&vs.sub(format!("cell_{}", layer)), layer, &spec, input_size)?;

            debug!(
                "Layer {}: {:?} cell, input size: {}, output size: {}",
                layer,
                config.cell_type,
                cell.input_size(),
                cell.output_size()
            );

            input_size = cell.output_size();
            layers.push(cell);
        }

        Ok(CellStack { layers })
    }

    pub fn input_size(&self) -> i64 {
        self.layers.first().map(RegularizedCell::input_size).unwrap_or(0)
    }

    /// Size of the outputs of the last layer.
    pub fn output_size(&self) -> i64 {
        self.layers.last().map(RegularizedCell::output_size).unwrap_or(0)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl RecurrentModule for CellStack {
    type State = StackState;

    type Error = EncoderError;

    fn zero_state(
        &self,
        batch_size: i64,
        kind: Kind,
        train: bool,
    ) -> Result<Self::State, Self::Error> {
        let layers = self
            .layers
            .iter()
            .map(|layer| layer.zero_state(batch_size, kind, train))
            .collect::<Result<_, _>>()?;

        Ok(StackState { layers })
    }

    fn step(
        &self,
        input: &Tensor,
        state: &Self::State,
        train: bool,
    ) -> Result<(Tensor, Self::State), Self::Error> {
        if state.layers.len() != self.layers.len() {
            return Err(ShapeError::IncompatibleState(format!(
                "state has {} layers, stack has {}",
                state.layers.len(),
                self.layers.len()
            ))
            .into());
        }

        let mut output = input.shallow_clone();
        let mut new_layers = Vec::with_capacity(self.layers.len());
        for (layer, layer_state) in self.layers.iter().zip(&state.layers) {
            let (layer_output, new_state) = layer.step(&output, layer_state, train)?;
            output = layer_output;
            new_layers.push(new_state);
        }

        Ok((output, StackState { layers: new_layers }))
    }
}
