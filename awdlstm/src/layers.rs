//! Basic neural network modules.
//!
//! These are modules that are not provided by the Torch binding, or where
//! different behavior is required from the modules.

use awdlstm_tch_ext::PathExt;
use tch::{self, Device, Kind, TchError, Tensor};

use crate::cow::CowTensor;
use crate::module::{FallibleModule, FallibleModuleT};

/// Dropout layer.
///
/// This layer zeros out random elements of a tensor with probability
/// *p*. Dropout is a form of regularization and prevents
/// co-adaptation of neurons.
#[derive(Clone, Copy, Debug)]
pub struct Dropout {
    p: f64,
}

impl Dropout {
    /// Drop out elements with probability *p*.
    pub fn new(p: f64) -> Self {
        Dropout { p }
    }

    /// Keep elements with probability *keep_prob*.
    pub fn from_keep_prob(keep_prob: f64) -> Self {
        Dropout { p: 1. - keep_prob }
    }

    /// Returns `true` if the layer never drops elements.
    pub fn is_identity(&self) -> bool {
        self.p <= 0.
    }

    /// Sample a dropout mask.
    ///
    /// The mask contains zeros for dropped elements and *1/(1-p)* for
    /// kept elements. Returns `None` when dropout is not applied, i.e.
    /// when `train` is `false` or *p* is zero.
    pub fn sample_mask(
        &self,
        shape: &[i64],
        kind: Kind,
        device: Device,
        train: bool,
    ) -> Result<Option<Tensor>, TchError> {
        if !train || self.is_identity() {
            return Ok(None);
        }

        let keep_prob = 1. - self.p;
        let mask = Tensor::f_full(shape, keep_prob, (Kind::Float, device))?
            .f_bernoulli()?
            .f_div_scalar(keep_prob)?
            .f_to_kind(kind)?;

        Ok(Some(mask))
    }
}

impl FallibleModuleT for Dropout {
    type Error = TchError;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error> {
        if !train || self.is_identity() {
            return Ok(input.shallow_clone());
        }

        input.f_dropout(self.p, train)
    }
}

/// Multiply by a dropout mask, if present.
pub(crate) fn apply_mask(input: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, TchError> {
    match mask {
        Some(mask) => input.f_mul(mask),
        None => Ok(input.shallow_clone()),
    }
}

/// Layer that applies layer normalization.
#[derive(Debug)]
pub struct LayerNorm {
    eps: f64,
    normalized_shape: Vec<i64>,

    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    /// Construct a layer normalization layer.
    ///
    /// The mean and standard deviation are computed over the last
    /// number of dimensions with the shape defined by
    /// `normalized_shape`. A learnable affine transformation of the
    /// shape `normalized_shape` is applied after normalization.
    pub fn new(vs: &PathExt, normalized_shape: impl Into<Vec<i64>>, eps: f64) -> Self {
        let normalized_shape = normalized_shape.into();

        LayerNorm {
            eps,
            weight: vs.ones("gamma", &normalized_shape),
            bias: vs.zeros("beta", &normalized_shape),
            normalized_shape,
        }
    }
}

impl FallibleModule for LayerNorm {
    type Error = TchError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        let weight = CowTensor::cast(&self.weight, input.kind())?;
        let bias = CowTensor::cast(&self.bias, input.kind())?;

        input.f_layer_norm(
            &self.normalized_shape,
            Some(&*weight),
            Some(&*bias),
            self.eps,
            false,
        )
    }
}
