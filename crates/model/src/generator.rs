//! Output head: linear projection to the target vocabulary and log-softmax.

use candle_core::{DType, Device, Result, Tensor, Var, D};
use candle_nn::ops::log_softmax;
use layers::{checks, init::ParamInit, Linear, LinearConfig, PrecisionPolicy};
use rand::rngs::StdRng;

#[derive(Debug)]
pub struct Generator {
    proj: Linear,
    policy: PrecisionPolicy,
}

impl Generator {
    pub fn new(d_model: usize, vocab_size: usize, rng: &mut StdRng, device: &Device, dtype: DType) -> Result<Self> {
        let proj = Linear::with_init(
            LinearConfig::new(d_model, vocab_size),
            ParamInit::XavierUniform,
            rng,
            device,
            dtype,
        )?;
        Ok(Self {
            proj,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.proj.config().output_dim
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.proj.named_parameters(&format!("{scope}.proj"))
    }

    /// Log-probabilities shaped `(batch, seq, vocab_size)`.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("generator.input", hidden, self.proj.config().input_dim)?;
        let logits = self.proj.forward(hidden, &self.policy)?;
        let log_probs = log_softmax(&self.policy.cast_for_reduction(&logits)?, D::Minus1)?;
        self.policy.cast_to_storage(&log_probs)
    }
}
