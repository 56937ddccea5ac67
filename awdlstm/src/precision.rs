use serde::{Deserialize, Serialize};
use tch::Kind;

/// Numeric precision of the encoder computations.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    /// Half-precision parameters and computations.
    Float16,

    /// Single-precision parameters and computations.
    Float32,

    /// Single-precision parameters, half-precision computations.
    ///
    /// Regularization penalties are computed in single precision.
    Mixed,
}

impl Dtype {
    /// The kind of the activations.
    pub fn compute_kind(self) -> Kind {
        match self {
            Dtype::Float32 => Kind::Float,
            Dtype::Float16 | Dtype::Mixed => Kind::Half,
        }
    }

    pub fn is_mixed(self) -> bool {
        self == Dtype::Mixed
    }
}

impl Default for Dtype {
    fn default() -> Self {
        Dtype::Float32
    }
}

#[cfg(test)]
mod tests {
    use tch::Kind;

    use crate::precision::Dtype;

    #[test]
    fn compute_kinds() {
        assert_eq!(Dtype::Float32.compute_kind(), Kind::Float);
        assert_eq!(Dtype::Float16.compute_kind(), Kind::Half);
        assert_eq!(Dtype::Mixed.compute_kind(), Kind::Half);
        assert!(Dtype::Mixed.is_mixed());
        assert!(!Dtype::Float16.is_mixed());
    }
}
