//! Token embedding followed by the positional signal.

use candle_core::{DType, Device, Result, Tensor, Var};
use layers::PrecisionPolicy;
use rand::{rngs::StdRng, Rng};

use crate::positional::{PositionalEncoding, PositionalEncodingConfig};
use crate::token::{TokenEmbedding, TokenEmbeddingConfig};

/// `dropout(embed(tokens) * sqrt(d_model) + PE)` for one side of the model.
#[derive(Debug)]
pub struct SequenceEmbedding {
    token: TokenEmbedding,
    positional: PositionalEncoding,
    policy: PrecisionPolicy,
}

impl SequenceEmbedding {
    pub fn new(
        vocab_size: usize,
        d_model: usize,
        max_len: usize,
        dropout_p: f32,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let token = TokenEmbedding::new(
            TokenEmbeddingConfig {
                vocab_size,
                hidden_dim: d_model,
                dtype,
                device: device.clone(),
            },
            rng,
        )?;
        let positional = PositionalEncoding::new(
            PositionalEncodingConfig::new(d_model, dropout_p).with_max_len(max_len),
            rng.gen(),
            device,
            dtype,
        )?;
        Ok(Self {
            token,
            positional,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    pub fn token(&self) -> &TokenEmbedding {
        &self.token
    }

    pub fn positional(&self) -> &PositionalEncoding {
        &self.positional
    }

    pub fn set_training(&self, training: bool) {
        self.positional.set_training(training);
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.token.named_parameters(&format!("{scope}.token"))
    }

    /// Maps `(batch, seq)` ids to `(batch, seq, d_model)` activations.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let embedded = self.token.forward(token_ids)?;
        self.positional.forward(&embedded, &self.policy)
    }
}
