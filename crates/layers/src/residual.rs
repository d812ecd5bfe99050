//! Pre-norm residual wrapper used around every attention and feed-forward sublayer.
//!
//! ```text
//! out = x + dropout(sublayer(norm(x)))
//! ```
//!
//! The sublayer is an arbitrary closure so the same wrapper serves
//! self-attention, cross-attention (which closes over the encoder memory) and
//! the feed-forward network.

use candle_core::{DType, Device, Result, Tensor, Var};
use rand::{rngs::StdRng, Rng};

use crate::{
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    norm::{LayerNorm, NormConfig},
};

#[derive(Debug)]
pub struct SublayerConnection {
    norm: LayerNorm,
    dropout: Dropout,
}

impl SublayerConnection {
    pub fn new(
        norm_config: NormConfig,
        dropout_p: f32,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let norm = LayerNorm::with_defaults(norm_config, rng, device, dtype)?;
        let dropout = Dropout::new(dropout_p, rng.gen())?;
        Ok(Self { norm, dropout })
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.norm.named_parameters(&format!("{scope}.norm"))
    }

    /// Runs `sublayer` on the normalised input and adds the result back onto `hidden`.
    pub fn forward<F>(&self, hidden: &Tensor, policy: &PrecisionPolicy, sublayer: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        let normed = self.norm.forward(hidden, policy)?;
        let branch = sublayer(&normed)?;
        checks::expect_shape("residual.branch", &branch, hidden.dims())?;
        checks::expect_same_dtype("residual.branch", &branch, "residual.input", hidden)?;

        let branch = self.dropout.forward(&branch, policy)?;
        let sum = policy
            .cast_for_matmul(&branch)?
            .add(&policy.cast_for_matmul(hidden)?)?;
        policy.cast_to_storage(&sum)
    }
}
