//! Dense affine projections.
//!
//! Linear layers accept `(batch, seq, in_dim)` or `(rows, in_dim)` inputs and
//! return the same leading dims with `out_dim` features. Weights are stored as
//! `(out_dim, in_dim)`; the forward pass promotes inputs and parameters to
//! [`PrecisionPolicy::compute`] for the matmul and casts back to storage.

use candle_core::{DType, Device, Error, Result, Tensor, Var};
use rand::rngs::StdRng;

use crate::{checks, dtypes::PrecisionPolicy, init::ParamInit};

/// Configuration for a dense projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Outgoing feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration with a bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Affine projection `y = x W^T + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Var,
    bias: Option<Var>,
}

impl Linear {
    /// Wraps pre-existing parameters after validating their shapes.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        let weight = Var::from_tensor(&weight)?;
        let bias = bias.map(|b| Var::from_tensor(&b)).transpose()?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a layer with `init` weights and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: ParamInit,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample(&[config.output_dim, config.input_dim], rng, device, dtype)?;
        let bias = if config.bias {
            Some(ParamInit::Zeros.sample(&[config.output_dim], rng, device, dtype)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns the weight tensor, shaped `(out_dim, in_dim)`.
    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref().map(|b| b.as_tensor())
    }

    /// Trainable parameters named under `scope`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = vec![(format!("{scope}.weight"), self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push((format!("{scope}.bias"), bias.clone()));
        }
        params
    }

    /// Applies the projection.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(self.weight.as_tensor())?.t()?;

        let mut output = match input.dims() {
            &[batch, seq, _] => input
                .reshape((batch * seq, self.config.input_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            _ => input.matmul(&weight_t)?,
        };

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(bias.as_tensor())?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, &checks::FLOAT_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, &checks::FLOAT_DTYPES)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [_, _, last] | [_, last] if *last == self.config.input_dim => Ok(()),
            [_, _, last] | [_, last] => Err(Error::Msg(format!(
                "linear.input: expected last dim {} but received {}",
                self.config.input_dim, last
            ))),
            dims => Err(Error::Msg(format!(
                "linear.input: expected [B, T, H_in] or [T, H_in], got {dims:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    fn reference_linear(input: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden) = input.dims3()?;
        input
            .reshape((batch * seq, hidden))?
            .matmul(&weight.t()?)?
            .broadcast_add(bias)?
            .reshape((batch, seq, weight.dims()[0]))
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 12);
        let weight = Tensor::randn(0f32, 0.05, (12, 8), &device)?;
        let bias = Tensor::randn(0f32, 0.02, 12, &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::new(
                config.clone(),
                weight.to_dtype(dtype)?,
                Some(bias.to_dtype(dtype)?),
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?.to_dtype(dtype)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = linear.forward(&input, &policy)?;

            assert_eq!(output.dims(), &[2, 5, 12]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_linear(&input.to_dtype(DType::F32)?, &weight, &bias)?;
            let max = output
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            assert!(max <= tol, "max diff {max} for {dtype:?}");
        }
        Ok(())
    }

    #[test]
    fn xavier_init_with_zero_bias() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let linear = Linear::with_init(
            LinearConfig::new(16, 48),
            ParamInit::XavierUniform,
            &mut rng,
            &Device::Cpu,
            DType::F32,
        )?;
        let bound = (6.0f32 / 64.0).sqrt();
        let weights = linear.weight().flatten_all()?.to_vec1::<f32>()?;
        assert!(weights.iter().all(|w| w.abs() <= bound));
        let bias = linear.bias().map(|b| b.to_vec1::<f32>()).transpose()?;
        assert_eq!(bias, Some(vec![0.0; 48]));
        assert_eq!(linear.named_parameters("proj").len(), 2);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_input_width() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(2);
        let linear = Linear::with_init(
            LinearConfig::new(4, 4),
            ParamInit::XavierUniform,
            &mut rng,
            &Device::Cpu,
            DType::F32,
        )?;
        let input = Tensor::zeros((1, 2, 5), DType::F32, &Device::Cpu)?;
        let err = linear.forward(&input, &PrecisionPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("expected last dim 4"));
        Ok(())
    }

    #[test]
    fn bias_configuration_must_match() {
        let device = Device::Cpu;
        let weight = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        let bias = Tensor::zeros(2, DType::F32, &device).unwrap();
        let mut config = LinearConfig::new(2, 2);
        config.bias = false;
        assert!(Linear::new(config, weight.clone(), Some(bias)).is_err());
        assert!(Linear::new(LinearConfig::new(2, 2), weight, None).is_err());
    }
}
