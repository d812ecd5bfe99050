//! Token id lookup.
//!
//! The table holds one row per vocabulary entry. Lookups return the row
//! multiplied by `sqrt(hidden_dim)` so token vectors stay on the same scale as
//! the sinusoidal signal added afterwards.

use candle_core::{bail, DType, Device, Result, Tensor, Var};
use layers::{init::ParamInit, PrecisionPolicy};
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    pub vocab_size: usize,
    /// Width of each row, `d_model` in the surrounding model.
    pub hidden_dim: usize,
    pub dtype: DType,
    pub device: Device,
}

#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    table: Var,
    policy: PrecisionPolicy,
    scale: f64,
}

impl TokenEmbedding {
    /// Samples a `(vocab_size, hidden_dim)` Xavier-uniform table from `rng`.
    pub fn new(config: TokenEmbeddingConfig, rng: &mut StdRng) -> Result<Self> {
        if config.vocab_size == 0 || config.hidden_dim == 0 {
            bail!(
                "token_embedding: vocab_size and hidden_dim must be positive, got {}x{}",
                config.vocab_size,
                config.hidden_dim
            );
        }
        let table = ParamInit::XavierUniform.sample_var(
            &[config.vocab_size, config.hidden_dim],
            rng,
            &config.device,
            config.dtype,
        )?;
        Ok(Self {
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
            scale: (config.hidden_dim as f64).sqrt(),
            config,
            table,
        })
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// The raw, unscaled table.
    pub fn weight(&self) -> Tensor {
        self.table.as_tensor().clone()
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.weight"), self.table.clone())]
    }

    /// Maps integer ids shaped `(batch, seq)` to `(batch, seq, hidden_dim)`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = self.id_dims(token_ids)?;
        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.check_id_range(&flat)?;

        let rows = self.table.as_tensor().index_select(&flat, 0)?;
        let scaled = (self.policy.cast_for_matmul(&rows)? * self.scale)?;
        self.policy
            .cast_to_storage(&scaled.reshape((batch, seq, self.config.hidden_dim))?)
    }

    fn id_dims(&self, token_ids: &Tensor) -> Result<(usize, usize)> {
        if !token_ids.dtype().is_int() {
            bail!(
                "token_embedding: ids must use an integer dtype, got {:?}",
                token_ids.dtype()
            );
        }
        match token_ids.dims() {
            &[batch, seq] if batch > 0 && seq > 0 => Ok((batch, seq)),
            dims => bail!("token_embedding: ids must be a non-empty (batch, seq) tensor, got {dims:?}"),
        }
    }

    fn check_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let lowest = flat_ids.min_all()?.to_scalar::<i64>()?;
        if lowest < 0 {
            bail!("token_embedding: negative token id {lowest}");
        }
        let highest = flat_ids.max_all()?.to_scalar::<i64>()?;
        if highest >= self.config.vocab_size as i64 {
            bail!(
                "token id {highest} exceeds vocab size {}",
                self.config.vocab_size
            );
        }
        Ok(())
    }
}
