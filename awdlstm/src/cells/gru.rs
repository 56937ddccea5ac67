use awdlstm_tch_ext::PathExt;
use tch::nn::Init;
use tch::{Kind, TchError, Tensor};

use crate::cells::{awd_init, CellState, RecurrentCell};
use crate::config::CellParams;
use crate::cow::CowTensor;
use crate::layers::{apply_mask, Dropout};
use crate::module::RecurrentModule;

/// Gated recurrent unit cell.
///
/// *[r, u] = σ(x·W_g + h·U_g + b_g)*, the candidate is
/// *c = tanh(x·W_c + (r·h)·U_c + b_c)* and the new state
/// *h' = u·h + (1 - u)·c*. The gate bias is initialized to one.
#[derive(Debug)]
pub struct GruCell {
    input_kernel: Tensor,
    recurrent_kernel: Tensor,
    gate_bias: Tensor,
    candidate_bias: Tensor,

    recurrent_dropout: Dropout,

    input_size: i64,
    num_units: i64,
}

impl GruCell {
    pub fn new(vs: &PathExt, input_size: i64, params: &CellParams) -> Result<Self, TchError> {
        let num_units = params.num_units;
        let init = awd_init(num_units);

        Ok(GruCell {
            input_kernel: vs.var_regularized(
                "input_kernel",
                &[input_size, 3 * num_units],
                init,
            )?,
            recurrent_kernel: vs.var_regularized(
                "recurrent_kernel",
                &[num_units, 3 * num_units],
                init,
            )?,
            gate_bias: vs.var("gate_bias", &[2 * num_units], Init::Const(1.))?,
            candidate_bias: vs.var("candidate_bias", &[num_units], Init::Const(0.))?,

            recurrent_dropout: Dropout::from_keep_prob(params.recurrent_keep_prob),

            input_size,
            num_units,
        })
    }
}

impl RecurrentModule for GruCell {
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
            memory: None,
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
        let hidden = &state.hidden;

        let input_kernel = CowTensor::cast(&self.input_kernel, kind)?;
        let recurrent_kernel = CowTensor::cast(&self.recurrent_kernel, kind)?;
        let recurrent_kernel = apply_mask(&recurrent_kernel, state.recurrent_mask.as_ref())?;
        let gate_bias = CowTensor::cast(&self.gate_bias, kind)?;
        let candidate_bias = CowTensor::cast(&self.candidate_bias, kind)?;

        let input_proj = input.f_matmul(&input_kernel)?;
        let input_gates = input_proj.f_narrow(-1, 0, 2 * self.num_units)?;
        let input_candidate = input_proj.f_narrow(-1, 2 * self.num_units, self.num_units)?;

        let recurrent_gates = recurrent_kernel.f_narrow(-1, 0, 2 * self.num_units)?;
        let recurrent_candidate =
            recurrent_kernel.f_narrow(-1, 2 * self.num_units, self.num_units)?;

        let gates = input_gates
            .f_add(&hidden.f_matmul(&recurrent_gates)?)?
            .f_add(&*gate_bias)?
            .f_sigmoid()?;
        let reset = gates.f_narrow(-1, 0, self.num_units)?;
        let update = gates.f_narrow(-1, self.num_units, self.num_units)?;

        let candidate = input_candidate
            .f_add(&reset.f_mul(hidden)?.f_matmul(&recurrent_candidate)?)?
            .f_add(&*candidate_bias)?
            .f_tanh()?;

        let new_hidden = update
            .f_mul(hidden)?
            .f_add(&update.f_neg()?.f_add_scalar(1.)?.f_mul(&candidate)?)?;

        Ok((
            new_hidden.shallow_clone(),
            CellState {
                hidden: new_hidden,
                memory: None,
                recurrent_mask: state.recurrent_mask.as_ref().map(Tensor::shallow_clone),
            },
        ))
    }
}

impl RecurrentCell for GruCell {
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

    use crate::cells::GruCell;
    use crate::config::CellParams;
    use crate::module::RecurrentModule;

    #[test]
    fn gru_step() {
        let vs = VarStore::new(Device::Cpu);
        let cell = GruCell::new(&vs.root_ext(|_| 0), 2, &CellParams::with_num_units(2)).unwrap();
        tch::no_grad(|| {
            for (name, mut var) in vs.variables() {
                if name.ends_with("kernel") {
                    let _ = var.f_fill_(0.5).unwrap();
                }
            }
        });

        let state = cell.zero_state(1, Kind::Float, false).unwrap();
        assert!(state.memory.is_none());

        let input = Tensor::from_slice(&[1f32, 1.]).view([1, 2]);
        let (output, _) = cell.step(&input, &state, false).unwrap();

        // h = 0, so h' = (1 - u)·tanh(x·W_c) with u = σ(1 + 1).
        let u = 1. / (1. + (-2f32).exp());
        let h = (1. - u) * 1f32.tanh();

        let output: ArrayD<f32> = (&output).try_into().unwrap();
        assert_abs_diff_eq!(output, array![[h, h]].into_dyn(), epsilon = 1e-6);
    }
}
