//! Layer normalisation over the feature axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are
//! computed over the last axis in [`PrecisionPolicy::reduction`]:
//!
//! ```text
//! y = a * (x - mean) / (std + eps) + b
//! ```
//!
//! where `std` is the unbiased (Bessel corrected) standard deviation and `eps`
//! is added to the standard deviation rather than the variance.

use candle_core::{DType, Device, Result, Tensor, Var, D};
use rand::rngs::StdRng;

use crate::{checks, dtypes::PrecisionPolicy, init::ParamInit};

/// Default stabiliser added to the standard deviation.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the normalised feature axis.
    pub hidden_size: usize,
    /// Added to the standard deviation before dividing.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Layer normalisation with learnable scale `a` and shift `b`.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    scale: Var,
    shift: Var,
}

impl LayerNorm {
    /// Wraps explicit scale/shift parameters.
    pub fn new(scale: Tensor, shift: Tensor, config: NormConfig) -> Result<Self> {
        for (name, tensor) in [("norm.scale", &scale), ("norm.shift", &shift)] {
            checks::expect_shape(name, tensor, &[config.hidden_size])?;
            checks::expect_dtype_in(name, tensor, &checks::FLOAT_DTYPES)?;
        }
        Ok(Self {
            config,
            scale: Var::from_tensor(&scale)?,
            shift: Var::from_tensor(&shift)?,
        })
    }

    /// Scale initialised to ones and shift to zeros.
    pub fn with_defaults(
        config: NormConfig,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let dims = [config.hidden_size];
        let scale = ParamInit::Ones.sample(&dims, rng, device, dtype)?;
        let shift = ParamInit::Zeros.sample(&dims, rng, device, dtype)?;
        Self::new(scale, shift, config)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (format!("{scope}.a"), self.scale.clone()),
            (format!("{scope}.b"), self.shift.clone()),
        ]
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let n = self.config.hidden_size as f64;
        let x = policy.cast_for_reduction(hidden)?;
        let mean = (x.sum_keepdim(D::Minus1)? / n)?;
        let centered = x.broadcast_sub(&mean)?;
        // A single feature has no spread; dividing by 1 keeps the output finite.
        let bessel = (n - 1.0).max(1.0);
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / bessel)?;
        let denom = (variance.sqrt()? + self.config.epsilon)?;
        let normalized = centered.broadcast_div(&denom)?;

        let scale = self.scale.as_tensor().to_dtype(normalized.dtype())?;
        let shift = self.shift.as_tensor().to_dtype(normalized.dtype())?;
        let out = normalized.broadcast_mul(&scale)?.broadcast_add(&shift)?;
        policy.cast_to_storage(&out)
    }
}
