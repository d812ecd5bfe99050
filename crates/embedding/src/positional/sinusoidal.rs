//! Sinusoidal positional encoding.
//!
//! ```text
//! PE(p, 2i)   = sin(p / 10000^(2i / d_model))
//! PE(p, 2i+1) = cos(p / 10000^(2i / d_model))
//! ```
//!
//! The table is computed once on the host for `max_len` positions, stored as
//! a `(1, max_len, d_model)` constant and sliced to the input length on every
//! call. It is not a trainable parameter.

use candle_core::{bail, DType, Device, Result, Tensor};
use layers::{checks, Dropout, PrecisionPolicy};

pub const DEFAULT_MAX_LEN: usize = 5000;

#[derive(Debug, Clone, PartialEq)]
pub struct PositionalEncodingConfig {
    pub d_model: usize,
    /// Longest sequence the table covers.
    pub max_len: usize,
    /// Dropout applied after the encoding is added.
    pub dropout_p: f32,
}

impl PositionalEncodingConfig {
    pub fn new(d_model: usize, dropout_p: f32) -> Self {
        Self {
            d_model,
            max_len: DEFAULT_MAX_LEN,
            dropout_p,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

#[derive(Debug)]
pub struct PositionalEncoding {
    config: PositionalEncodingConfig,
    table: Tensor,
    dropout: Dropout,
}

impl PositionalEncoding {
    pub fn new(config: PositionalEncodingConfig, seed: u64, device: &Device, dtype: DType) -> Result<Self> {
        if config.d_model == 0 || config.max_len == 0 {
            bail!(
                "positional_encoding requires d_model > 0 and max_len > 0, got d_model={} max_len={}",
                config.d_model,
                config.max_len
            );
        }
        checks::ensure_float("positional_encoding", dtype)?;

        let values = sinusoid_table(config.max_len, config.d_model);
        let table = Tensor::from_vec(values, (1, config.max_len, config.d_model), device)?.to_dtype(dtype)?;
        let dropout = Dropout::new(config.dropout_p, seed)?;
        log::debug!(
            "positional_encoding table built max_len={} d_model={}",
            config.max_len,
            config.d_model
        );
        Ok(Self {
            config,
            table,
            dropout,
        })
    }

    pub fn config(&self) -> &PositionalEncodingConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    /// The first `len` rows of the table, shaped `(len, d_model)`.
    pub fn encoding(&self, len: usize) -> Result<Tensor> {
        self.ensure_len(len)?;
        self.table.narrow(1, 0, len)?.squeeze(0)
    }

    /// Adds the encoding to a `(batch, seq, d_model)` input and applies dropout.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("positional_encoding.input", hidden, self.config.d_model)?;
        let seq = hidden.dim(1)?;
        self.ensure_len(seq)?;

        let signal = policy.cast_for_matmul(&self.table.narrow(1, 0, seq)?)?;
        let summed = policy.cast_for_matmul(hidden)?.broadcast_add(&signal)?;
        let summed = policy.cast_to_storage(&summed)?;
        self.dropout.forward(&summed, policy)
    }

    fn ensure_len(&self, len: usize) -> Result<()> {
        if len > self.config.max_len {
            bail!(
                "positional_encoding: sequence length {len} exceeds max_len {}",
                self.config.max_len
            );
        }
        Ok(())
    }
}

fn sinusoid_table(max_len: usize, d_model: usize) -> Vec<f32> {
    let log_base = -(10_000f64.ln()) / d_model as f64;
    let div_terms: Vec<f64> = (0..d_model)
        .map(|channel| ((channel - channel % 2) as f64 * log_base).exp())
        .collect();

    let mut values = Vec::with_capacity(max_len * d_model);
    for position in 0..max_len {
        for (channel, div) in div_terms.iter().enumerate() {
            let angle = position as f64 * div;
            let value = if channel % 2 == 0 { angle.sin() } else { angle.cos() };
            values.push(value as f32);
        }
    }
    values
}
