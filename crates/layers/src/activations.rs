//! Non-linearities used between feed-forward projections.
//!
//! Activations keep the input layout, evaluate in [`PrecisionPolicy::compute`]
//! and cast the result back to storage.

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Activation applied inside [`PositionwiseFeedForward`](crate::mlp::PositionwiseFeedForward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationKind {
    /// `max(0, x)`.
    #[default]
    Relu,
    /// Exact GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`.
    Gelu,
}

impl ActivationKind {
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let compute = policy.cast_for_matmul(input)?;
        let out = match self {
            ActivationKind::Relu => compute.relu()?,
            ActivationKind::Gelu => compute.gelu_erf()?,
        };
        policy.cast_to_storage(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    #[test]
    fn relu_zeroes_negatives() -> Result<()> {
        let input = Tensor::new(&[-2.0f32, -0.0, 0.5, 3.0], &Device::Cpu)?;
        let out = ActivationKind::Relu.forward(&input, &PrecisionPolicy::default())?;
        assert_eq!(out.to_vec1::<f32>()?, vec![0.0, 0.0, 0.5, 3.0]);
        Ok(())
    }

    #[test]
    fn gelu_matches_erf_formula() -> Result<()> {
        let input = Tensor::new(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], &Device::Cpu)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let output = ActivationKind::Gelu.forward(&input, &policy)?;

        let inner = (input.affine(1.0 / SQRT_2, 0.0)?.erf()? + 1.0)?;
        let reference = input.affine(0.5, 0.0)?.mul(&inner)?;
        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }
}
