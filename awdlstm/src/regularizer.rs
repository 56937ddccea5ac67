//! Weight regularizers.

use std::fmt::Debug;

use tch::{Kind, TchError, Tensor};

use crate::config::{RegularizerKind, RegularizerParams};
use crate::error::ConfigurationError;

/// Penalty on the values of a weight tensor.
pub trait Regularize: Debug + Send {
    /// Compute the penalty of a weight tensor as a scalar.
    fn penalty(&self, weights: &Tensor) -> Result<Tensor, TchError>;
}

/// L1, L2, or combined weight penalties.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Regularizer {
    /// *scale · Σ|w|*
    L1 { scale: f64 },

    /// *scale · Σw²/2*
    L2 { scale: f64 },

    /// Sum of the L1 and L2 penalties.
    L1L2 { scale_l1: f64, scale_l2: f64 },
}

impl Regularizer {
    /// Construct a regularizer from its configuration.
    pub fn new(kind: RegularizerKind, params: &RegularizerParams) -> Result<Self, ConfigurationError> {
        let regularizer = match kind {
            RegularizerKind::L1 => Regularizer::L1 {
                scale: required_scale("scale", params.scale)?,
            },
            RegularizerKind::L2 => Regularizer::L2 {
                scale: required_scale("scale", params.scale)?,
            },
            RegularizerKind::L1L2 => Regularizer::L1L2 {
                scale_l1: required_scale("scale_l1", params.scale_l1)?,
                scale_l2: required_scale("scale_l2", params.scale_l2)?,
            },
        };

        Ok(regularizer)
    }

    fn l1(weights: &Tensor, scale: f64) -> Result<Tensor, TchError> {
        weights.f_abs()?.f_sum(weights.kind())?.f_mul_scalar(scale)
    }

    fn l2(weights: &Tensor, scale: f64) -> Result<Tensor, TchError> {
        weights
            .f_square()?
            .f_sum(weights.kind())?
            .f_mul_scalar(scale / 2.)
    }
}

fn required_scale(option: &'static str, scale: Option<f64>) -> Result<f64, ConfigurationError> {
    let scale = scale.ok_or(ConfigurationError::MissingOption(option))?;
    if scale < 0. {
        return Err(ConfigurationError::NegativeRegularizerScale {
            option,
            value: scale,
        });
    }

    Ok(scale)
}

impl Regularize for Regularizer {
    fn penalty(&self, weights: &Tensor) -> Result<Tensor, TchError> {
        match *self {
            Regularizer::L1 { scale } => Self::l1(weights, scale),
            Regularizer::L2 { scale } => Self::l2(weights, scale),
            Regularizer::L1L2 { scale_l1, scale_l2 } => {
                Self::l1(weights, scale_l1)?.f_add(&Self::l2(weights, scale_l2)?)
            }
        }
    }
}

/// Regularizer that computes penalties in single precision.
///
/// Used in mixed-precision training, where half-precision sums of
/// squares overflow easily.
#[derive(Clone, Debug)]
pub struct MixedPrecision<R> {
    inner: R,
}

impl<R> MixedPrecision<R> {
    pub fn new(inner: R) -> Self {
        MixedPrecision { inner }
    }
}

impl<R> Regularize for MixedPrecision<R>
where
    R: Regularize,
{
    fn penalty(&self, weights: &Tensor) -> Result<Tensor, TchError> {
        self.inner.penalty(&weights.f_to_kind(Kind::Float)?)
    }
}

/// Sum the penalties of a set of weight tensors.
///
/// Returns `None` when there are no weights.
pub fn total_penalty<'a>(
    regularizer: &dyn Regularize,
    weights: impl IntoIterator<Item = &'a Tensor>,
) -> Result<Option<Tensor>, TchError> {
    let mut total: Option<Tensor> = None;
    for weight in weights {
        let penalty = regularizer.penalty(weight)?;
        total = Some(match total {
            Some(total) => total.f_add(&penalty)?,
            None => penalty,
        });
    }

    Ok(total)
}
