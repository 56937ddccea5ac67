//! Recurrent cells and their regularization wrapper.

use awdlstm_tch_ext::PathExt;
use tch::nn::Init;
use tch::{Kind, TchError, Tensor};

use crate::config::{CellParams, CellType};
use crate::error::{EncoderError, ShapeError};
use crate::layers::{apply_mask, Dropout};
use crate::module::{FallibleModuleT, RecurrentModule};

mod gru;
pub use gru::GruCell;

mod lstm;
pub use lstm::LstmCell;

/// State of a single recurrent cell.
#[derive(Debug)]
pub struct CellState {
    /// Hidden state, `[batch_size, num_units]`.
    pub hidden: Tensor,

    /// Memory of LSTM cells, `[batch_size, num_units]`.
    pub memory: Option<Tensor>,

    /// DropConnect mask of the recurrent kernel.
    pub recurrent_mask: Option<Tensor>,
}

/// Recurrent cell with known input and output sizes.
pub trait RecurrentCell: RecurrentModule<State = CellState, Error = TchError> {
    fn input_size(&self) -> i64;

    fn output_size(&self) -> i64;
}

/// Initializer of the cell kernels.
///
/// Uniform in *±1/sqrt(num_units)*.
pub(crate) fn awd_init(num_units: i64) -> Init {
    let limit = 1. / (num_units as f64).sqrt();
    Init::Uniform {
        lo: -limit,
        up: limit,
    }
}

/// Construction parameters of a regularized cell.
#[derive(Clone, Debug)]
pub struct CellSpec<'a> {
    pub cell_type: CellType,
    pub params: &'a CellParams,
    pub input_keep_prob: f64,
    pub output_keep_prob: f64,
    pub residual: bool,
    pub variational: bool,
}

/// Construct a cell wrapped with dropout and an optional residual
/// connection.
///
/// The cell input and output sizes must be equal when a residual
/// connection is used. This is checked before any variable is created.
/// `layer` is the index of the cell in its stack.
pub fn single_cell(
    vs: &PathExt,
    layer: usize,
    spec: &CellSpec,
    input_size: i64,
) -> Result<RegularizedCell, EncoderError> {
    if spec.residual && input_size != spec.params.num_units {
        return Err(ShapeError::SkipConnection {
            layer,
            input_size,
            output_size: spec.params.num_units,
        }
        .into());
    }

    let cell: Box<dyn RecurrentCell> = match spec.cell_type {
        CellType::Gru => Box::new(GruCell::new(vs, input_size, spec.params)?),
        CellType::Lstm => Box::new(LstmCell::new(vs, input_size, spec.params)?),
    };

    Ok(RegularizedCell {
        cell,
        input_dropout: Dropout::from_keep_prob(spec.input_keep_prob),
        output_dropout: Dropout::from_keep_prob(spec.output_keep_prob),
        residual: spec.residual,
        variational: spec.variational,
    })
}

/// State of a regularized cell.
#[derive(Debug)]
pub struct LayerState {
    pub cell: CellState,

    input_mask: Option<Tensor>,
    output_mask: Option<Tensor>,
}

/// Recurrent cell with dropout on its input and output.
///
/// The output is *dropout(cell(dropout(x)))*, plus *x* when the cell
/// has a residual connection. With variational dropout, the masks are
/// sampled once per sequence in `zero_state`. Otherwise new masks are
/// sampled in every step.
#[derive(Debug)]
pub struct RegularizedCell {
    cell: Box<dyn RecurrentCell>,
    input_dropout: Dropout,
    output_dropout: Dropout,
    residual: bool,
    variational: bool,
}

impl RegularizedCell {
    pub fn input_size(&self) -> i64 {
        self.cell.input_size()
    }

    pub fn output_size(&self) -> i64 {
        self.cell.output_size()
    }

    fn dropout(
        &self,
        dropout: &Dropout,
        mask: Option<&Tensor>,
        input: &Tensor,
        train: bool,
    ) -> Result<Tensor, TchError> {
        if self.variational {
            apply_mask(input, mask)
        } else {
            dropout.forward_t(input, train)
        }
    }
}

impl RecurrentModule for RegularizedCell {
    type State = LayerState;

    type Error = TchError;

    fn zero_state(
        &self,
        batch_size: i64,
        kind: Kind,
        train: bool,
    ) -> Result<Self::State, Self::Error> {
        let cell = self.cell.zero_state(batch_size, kind, train)?;
        let device = cell.hidden.device();

        let (input_mask, output_mask) = if self.variational {
            (
                self.input_dropout.sample_mask(
                    &[batch_size, self.input_size()],
                    kind,
                    device,
                    train,
                )?,
                self.output_dropout.sample_mask(
                    &[batch_size, self.output_size()],
                    kind,
                    device,
                    train,
                )?,
            )
        } else {
            (None, None)
        };

        Ok(LayerState {
            cell,
            input_mask,
            output_mask,
        })
    }

    fn step(
        &self,
        input: &Tensor,
        state: &Self::State,
        train: bool,
    ) -> Result<(Tensor, Self::State), Self::Error> {
        let cell_input = self.dropout(
            &self.input_dropout,
            state.input_mask.as_ref(),
            input,
            train,
        )?;

        let (output, cell_state) = self.cell.step(&cell_input, &state.cell, train)?;

        let mut output = self.dropout(
            &self.output_dropout,
            state.output_mask.as_ref(),
            &output,
            train,
        )?;

        if self.residual {
            output = output.f_add(input)?;
        }

        Ok((
            output,
            LayerState {
                cell: cell_state,
                input_mask: state.input_mask.as_ref().map(Tensor::shallow_clone),
                output_mask: state.output_mask.as_ref().map(Tensor::shallow_clone),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use approx::assert_abs_diff_eq;
    use awdlstm_tch_ext::RootExt;
    use ndarray::ArrayD;
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};

    use crate::cells::{single_cell, CellSpec};
    use crate::config::{CellParams, CellType};
    use crate::error::{EncoderError, ShapeError};
    use crate::module::RecurrentModule;

    fn spec(params: &CellParams, residual: bool) -> CellSpec {
        CellSpec {
            cell_type: CellType::Lstm,
            params,
            input_keep_prob: 0.5,
            output_keep_prob: 0.5,
            residual,
            variational: true,
        }
    }

    #[test]
    fn skip_connection_requires_equal_sizes() {
        let vs = VarStore::new(Device::Cpu);
        let params = CellParams::with_num_units(4);
        assert!(matches!(
            single_cell(&vs.root_ext(|_| 0), 0, &spec(&params, true), 3),
            Err(EncoderError::Shape(ShapeError::SkipConnection {
                input_size: 3,
                output_size: 4,
                ..
            }))
        ));
        assert!(vs.variables().is_empty());
    }

    #[test]
    fn residual_adds_input() {
        let vs = VarStore::new(Device::Cpu);
        let params = CellParams::with_num_units(3);
        let cell = single_cell(&vs.root_ext(|_| 0), 0, &spec(&params, true), 3).unwrap();
        tch::no_grad(|| {
            for (_, mut var) in vs.variables() {
                let _ = var.f_zero_().unwrap();
            }
        });

        // Zero kernels: c' = 0, so the cell output is zero.
        let input = Tensor::from_slice(&[1f32, 2., 3.]).view([1, 3]);
        let state = cell.zero_state(1, Kind::Float, false).unwrap();
        let (output, _) = cell.step(&input, &state, false).unwrap();

        let output: ArrayD<f32> = (&output).try_into().unwrap();
        let input: ArrayD<f32> = (&input).try_into().unwrap();
        assert_abs_diff_eq!(output, input, epsilon = 1e-6);
    }

    #[test]
    fn variational_masks_are_reused() {
        let vs = VarStore::new(Device::Cpu);
        let params = CellParams::with_num_units(3);
        let cell = single_cell(&vs.root_ext(|_| 0), 0, &spec(&params, false), 5).unwrap();

        let state = cell.zero_state(2, Kind::Float, true).unwrap();
        let input_mask = state.input_mask.as_ref().unwrap().shallow_clone();
        assert_eq!(input_mask.size(), &[2, 5]);
        assert_eq!(state.output_mask.as_ref().unwrap().size(), &[2, 3]);

        let input = Tensor::ones(&[2, 5], (Kind::Float, Device::Cpu));
        let (_, state) = cell.step(&input, &state, true).unwrap();
        let (_, state) = cell.step(&input, &state, true).unwrap();
        assert_eq!(state.input_mask.as_ref().unwrap(), &input_mask);

        let eval_state = cell.zero_state(2, Kind::Float, false).unwrap();
        assert!(eval_state.input_mask.is_none());
        assert!(eval_state.output_mask.is_none());
    }

    #[test]
    fn non_variational_masks_are_resampled() {
        let vs = VarStore::new(Device::Cpu);
        let params = CellParams::with_num_units(100);
        let spec = CellSpec {
            input_keep_prob: 1.0,
            output_keep_prob: 0.5,
            variational: false,
            ..spec(&params, false)
        };
        let cell = single_cell(&vs.root_ext(|_| 0), 0, &spec, 5).unwrap();
        tch::no_grad(|| {
            for (_, mut var) in vs.variables() {
                let _ = var.f_fill_(0.1).unwrap();
            }
        });

        let state = cell.zero_state(2, Kind::Float, true).unwrap();
        assert!(state.input_mask.is_none());
        assert!(state.output_mask.is_none());

        // Positive weights and inputs: every undropped output is positive.
        let input = Tensor::ones(&[2, 5], (Kind::Float, Device::Cpu));
        let (first, state) = cell.step(&input, &state, true).unwrap();
        let (second, state) = cell.step(&input, &state, true).unwrap();
        assert!(state.input_mask.is_none());
        assert!(state.output_mask.is_none());

        let first_dropped = first.f_eq(0.).unwrap();
        let second_dropped = second.f_eq(0.).unwrap();
        assert!(first_dropped.any().int64_value(&[]) != 0);
        assert!(first_dropped.logical_not().any().int64_value(&[]) != 0);
        assert_ne!(first_dropped, second_dropped);
    }
}
