use std::ops::Deref;

use tch::{Kind, TchError, Tensor};

/// A tensor that is either borrowed or owned.
pub enum CowTensor<'a> {
    Owned(Tensor),
    Borrowed(&'a Tensor),
}

impl<'a> CowTensor<'a> {
    /// Get the tensor in the given kind.
    ///
    /// The tensor is only copied when its kind differs.
    pub fn cast(tensor: &'a Tensor, kind: Kind) -> Result<Self, TchError> {
        if tensor.kind() == kind {
            Ok(CowTensor::Borrowed(tensor))
        } else {
            Ok(CowTensor::Owned(tensor.f_to_kind(kind)?))
        }
    }

    /// Convert into an owned tensor.
    ///
    /// Borrowed tensors are shallow-cloned, so that the result shares
    /// storage with the original tensor.
    pub fn into_owned(self) -> Tensor {
        match self {
            CowTensor::Owned(tensor) => tensor,
            CowTensor::Borrowed(tensor) => tensor.shallow_clone(),
        }
    }
}

impl<'a> Deref for CowTensor<'a> {
    type Target = Tensor;

    fn deref(&self) -> &Self::Target {
        match self {
            CowTensor::Owned(ref tensor) => tensor,
            CowTensor::Borrowed(tensor) => tensor,
        }
    }
}

#[cfg(test)]
mod tests {
    use tch::{Device, Kind, Tensor};

    use crate::cow::CowTensor;

    #[test]
    fn cast_borrows_when_kind_matches() {
        let t = Tensor::zeros(&[2, 3], (Kind::Float, Device::Cpu));
        assert!(matches!(
            CowTensor::cast(&t, Kind::Float).unwrap(),
            CowTensor::Borrowed(_)
        ));

        let half = CowTensor::cast(&t, Kind::Half).unwrap();
        assert!(matches!(half, CowTensor::Owned(_)));
        assert_eq!(half.kind(), Kind::Half);
        assert_eq!(half.size(), &[2, 3]);
    }
}
