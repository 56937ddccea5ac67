use awdlstm_tch_ext::PathExt;
use tch::nn::Init;
use tch::{Kind, TchError, Tensor};

use crate::cells::{awd_init, CellState, RecurrentCell};
use crate::config::CellParams;
use crate::cow::CowTensor;
use crate::layers::{apply_mask, Dropout, LayerNorm};
use crate::module::{FallibleModule, RecurrentModule};

/// Layer normalization of the gate pre-activations and the memory.
#[derive(Debug)]
struct LstmLayerNorms {
    input: LayerNorm,
    transform: LayerNorm,
    forget: LayerNorm,
    output: LayerNorm,
    state: LayerNorm,
}

impl LstmLayerNorms {
    fn new(vs: &PathExt, num_units: i64, eps: f64) -> Self {
        LstmLayerNorms {
            input: LayerNorm::new(&vs.sub("input"), vec![num_units], eps),
            transform: LayerNorm::new(&vs.sub("transform"), vec![num_units], eps),
            forget: LayerNorm::new(&vs.sub("forget"), vec![num_units], eps),
            output: LayerNorm::new(&vs.sub("output"), vec![num_units], eps),
            state: LayerNorm::new(&vs.sub("state"), vec![num_units], eps),
        }
    }
}

/// Long short-term memory cell.
///
/// The gates are computed as *[i, j, f, o] = x·W + h·U + b*, the new
/// memory as *c' = c·σ(f + forget_bias) + σ(i)·tanh(j)* and the new
/// hidden state as *h' = tanh(c')·σ(o)*.
///
/// The recurrent kernel *U* can be regularized with DropConnect: a
/// mask over its elements is sampled once per sequence.
#[derive(Debug)]
pub struct LstmCell {
    input_kernel: Tensor,
    recurrent_kernel: Tensor,
    bias: Tensor,

    forget_bias: f64,
    layer_norms: Option<LstmLayerNorms>,
    recurrent_dropout: Dropout,

    input_size: i64,
    num_units: i64,
}

impl LstmCell {
    pub fn new(vs: &PathExt, input_size: i64, params: &CellParams) -> Result<Self, TchError> {
        let num_units = params.num_units;
        let init = awd_init(num_units);

        let input_kernel =
            vs.var_regularized("input_kernel", &[input_size, 4 * num_units], init)?;
        let recurrent_kernel =
            vs.var_regularized("recurrent_kernel", &[num_units, 4 * num_units], init)?;
        let bias = vs.var("bias", &[4 * num_units], Init::Const(0.))?;

        let layer_norms = if params.layer_norm {
            Some(LstmLayerNorms::new(
                &vs.sub("layer_norm"),
                num_units,
                params.layer_norm_eps,
            ))
        } else {
            None
        };

        Ok(LstmCell {
            input_kernel,
            recurrent_kernel,
            bias,

            forget_bias: params.forget_bias,
            layer_norms,
            recurrent_dropout: Dropout::from_keep_prob(params.recurrent_keep_prob),

            input_size,
            num_units,
        })
    }
}

impl RecurrentModule for LstmCell {
    type State = CellState;

    type Error = TchError;

    fn zero_state(
        &self,
        batch_size: i64,
        kind: Kind,
        train: bool,
    ) -> Result<Self::State, Self::Error> {
        let device = self.input_kernel.device();

        Ok(CellState {
            hidden: Tensor::f_zeros(&[batch_size, self.num_units], (kind, device))?,
            memory: Some(Tensor::f_zeros(
                &[batch_size, self.num_units],
                (kind, device),
            )?),
            recurrent_mask: self.recurrent_dropout.sample_mask(
                &self.recurrent_kernel.size(),
                kind,
                device,
                train,
            )?,
        })
    }

    fn step(
        &self,
        input: &Tensor,
        state: &Self::State,
        _train: bool,
    ) -> Result<(Tensor, Self::State), Self::Error> {
        let kind = input.kind();

        let memory = state
            .memory
            .as_ref()
            .ok_or_else(|| TchError::Shape("LSTM state without memory".to_string()))?;

        let input_kernel = CowTensor::cast(&self.input_kernel, kind)?;
        let recurrent_kernel = CowTensor::cast(&self.recurrent_kernel, kind)?;
        let recurrent_kernel = apply_mask(&recurrent_kernel, state.recurrent_mask.as_ref())?;
        let bias = CowTensor::cast(&self.bias, kind)?;

        let gates = input
            .f_matmul(&input_kernel)?
            .f_add(&state.hidden.f_matmul(&recurrent_kernel)?)?
            .f_add(&*bias)?;

        let mut gates = gates.f_chunk(4, -1)?;
        let (mut i, mut j, mut f, mut o) = (
            gates.remove(0),
            gates.remove(0),
            gates.remove(0),
            gates.remove(0),
        );

        if let Some(ref norms) = self.layer_norms {
            i = norms.input.forward(&i)?;
            j = norms.transform.forward(&j)?;
            f = norms.forget.forward(&f)?;
            o = norms.output.forward(&o)?;
        }

        let mut new_memory = memory
            .f_mul(&f.f_add_scalar(self.forget_bias)?.f_sigmoid()?)?
            .f_add(&i.f_sigmoid()?.f_mul(&j.f_tanh()?)?)?;

        if let Some(ref norms) = self.layer_norms {
            new_memory = norms.state.forward(&new_memory)?;
        }

        let new_hidden = new_memory.f_tanh()?.f_mul(&o.f_sigmoid()?)?;

        Ok((
            new_hidden.shallow_clone(),
            CellState {
                hidden: new_hidden,
                memory: Some(new_memory),
                recurrent_mask: state.recurrent_mask.as_ref().map(Tensor::shallow_clone),
            },
        ))
    }
}

impl RecurrentCell for LstmCell {
    fn input_size(&self) -> i64 {
        self.input_size
    }

    fn output_size(&self) -> i64 {
        self.num_units
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use approx::assert_abs_diff_eq;
    use awdlstm_tch_ext::RootExt;
    use ndarray::{array, ArrayD};
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};

    use crate::cells::LstmCell;
    use crate::config::CellParams;
    use crate::module::RecurrentModule;

    fn constant_cell(vs: &VarStore, params: &CellParams) -> LstmCell {
        let cell = LstmCell::new(&vs.root_ext(|_| 0), 2, params).unwrap();
        tch::no_grad(|| {
            for (_, mut var) in vs.variables() {
                if var.size().len() == 2 {
                    let _ = var.f_fill_(0.1).unwrap();
                }
            }
        });
        cell
    }

    #[test]
    fn lstm_step() {
        let vs = VarStore::new(Device::Cpu);
        let cell = constant_cell(&vs, &CellParams::with_num_units(3));

        let state = cell.zero_state(1, Kind::Float, false).unwrap();
        assert_eq!(state.hidden.size(), &[1, 3]);
        assert!(state.recurrent_mask.is_none());

        let input = Tensor::from_slice(&[1f32, 1.]).view([1, 2]);
        let (output, state) = cell.step(&input, &state, false).unwrap();

        // All gates have pre-activation 0.2.
        let sig = |x: f32| 1. / (1. + (-x).exp());
        let c = sig(0.2) * 0.2f32.tanh();
        let h = c.tanh() * sig(0.2);

        let output: ArrayD<f32> = (&output).try_into().unwrap();
        assert_abs_diff_eq!(output, array![[h, h, h]].into_dyn(), epsilon = 1e-6);

        let memory: ArrayD<f32> = state.memory.as_ref().unwrap().try_into().unwrap();
        assert_abs_diff_eq!(memory, array![[c, c, c]].into_dyn(), epsilon = 1e-6);
    }

    #[test]
    fn lstm_layer_norm_creates_gate_norms() {
        let vs = VarStore::new(Device::Cpu);
        let mut params = CellParams::with_num_units(3);
        params.layer_norm = true;
        let cell = LstmCell::new(&vs.root_ext(|_| 0), 2, &params).unwrap();

        let mut names = vs.variables().into_keys().collect::<Vec<_>>();
        names.sort();
        assert_eq!(
            names,
            vec![
                "bias",
                "input_kernel",
                "layer_norm.forget.beta",
                "layer_norm.forget.gamma",
                "layer_norm.input.beta",
                "layer_norm.input.gamma",
                "layer_norm.output.beta",
                "layer_norm.output.gamma",
                "layer_norm.state.beta",
                "layer_norm.state.gamma",
                "layer_norm.transform.beta",
                "layer_norm.transform.gamma",
                "recurrent_kernel",
            ]
        );

        let state = cell.zero_state(2, Kind::Float, false).unwrap();
        let input = Tensor::from_slice(&[1f32, 0., 0., 1.]).view([2, 2]);
        let (output, _) = cell.step(&input, &state, false).unwrap();
        assert_eq!(output.size(), &[2, 3]);
    }

    #[test]
    fn drop_connect_mask_is_sampled_in_training() {
        let vs = VarStore::new(Device::Cpu);
        let mut params = CellParams::with_num_units(3);
        params.recurrent_keep_prob = 0.5;
        let cell = LstmCell::new(&vs.root_ext(|_| 0), 2, &params).unwrap();

        let state = cell.zero_state(4, Kind::Float, true).unwrap();
        assert_eq!(state.recurrent_mask.unwrap().size(), &[3, 12]);
        assert!(cell
            .zero_state(4, Kind::Float, false)
            .unwrap()
            .recurrent_mask
            .is_none());
    }
}
