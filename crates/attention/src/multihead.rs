//! Multi-head attention over `(batch, seq, d_model)` activations.
//!
//! Queries, keys and values are projected by independent Xavier-initialised
//! linear layers, split into `heads` slices of `d_k = d_model / heads`
//! features, attended jointly through [`ExactAttention`] and merged back
//! before the output projection.

use std::fmt;
use std::sync::Mutex;

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};
use layers::{checks, init::ParamInit, Linear, LinearConfig, PrecisionPolicy};
use rand::{rngs::StdRng, Rng};

use crate::core::{Attention, Config};
use crate::reference::ExactAttention;

/// Configuration for [`MultiHeadAttention`].
#[derive(Debug, Clone, PartialEq)]
pub struct MultiHeadConfig {
    pub d_model: usize,
    pub heads: usize,
    /// Dropout on the attention probabilities.
    pub dropout_p: f32,
}

impl MultiHeadConfig {
    pub fn new(d_model: usize, heads: usize, dropout_p: f32) -> Self {
        Self {
            d_model,
            heads,
            dropout_p,
        }
    }

    /// Per-head feature width, or an error when `d_model` does not split evenly.
    pub fn head_dim(&self) -> Result<usize> {
        if self.heads == 0 {
            bail!("multi_head_attention: heads must be positive");
        }
        if self.d_model % self.heads != 0 {
            bail!(
                "multi_head_attention: d_model {} is not divisible by heads {}",
                self.d_model,
                self.heads
            );
        }
        Ok(self.d_model / self.heads)
    }
}

pub struct MultiHeadAttention {
    config: MultiHeadConfig,
    head_dim: usize,
    policy: PrecisionPolicy,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    attention: ExactAttention,
    last_attention: Mutex<Option<Tensor>>,
}

impl fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("d_model", &self.config.d_model)
            .field("heads", &self.config.heads)
            .field("head_dim", &self.head_dim)
            .field("dropout_p", &self.config.dropout_p)
            .finish()
    }
}

impl MultiHeadAttention {
    pub fn new(config: MultiHeadConfig, rng: &mut StdRng, device: &Device, dtype: DType) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let projection = |rng: &mut StdRng| {
            Linear::with_init(
                LinearConfig::new(config.d_model, config.d_model),
                ParamInit::XavierUniform,
                rng,
                device,
                dtype,
            )
        };
        let q_proj = projection(rng)?;
        let k_proj = projection(rng)?;
        let v_proj = projection(rng)?;
        let out_proj = projection(rng)?;

        let attention = ExactAttention::new(Config::default().with_dropout(config.dropout_p), rng.gen())?;
        log::debug!(
            "multi_head_attention d_model={} heads={} head_dim={}",
            config.d_model,
            config.heads,
            head_dim
        );

        Ok(Self {
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            config,
            head_dim,
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            attention,
            last_attention: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MultiHeadConfig {
        &self.config
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn set_training(&self, training: bool) {
        self.attention.set_training(training);
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.q_proj.named_parameters(&format!("{scope}.q_proj"));
        params.extend(self.k_proj.named_parameters(&format!("{scope}.k_proj")));
        params.extend(self.v_proj.named_parameters(&format!("{scope}.v_proj")));
        params.extend(self.out_proj.named_parameters(&format!("{scope}.out_proj")));
        params
    }

    /// Probabilities from the most recent forward call, shaped
    /// `(batch, heads, q_len, k_len)`.
    pub fn last_attention(&self) -> Option<Tensor> {
        self.last_attention
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Attends `query` over `key`/`value`.
    ///
    /// `mask` is a keep-mask broadcastable to `(batch, q_len, k_len)`; it is
    /// shared by every head.
    pub fn forward(&self, query: &Tensor, key: &Tensor, value: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("attention.query", query, self.config.d_model)?;
        checks::expect_batch_seq_hidden("attention.key", key, self.config.d_model)?;
        checks::expect_batch_seq_hidden("attention.value", value, self.config.d_model)?;

        let q = self.expand_to_heads(&self.q_proj.forward(query, &self.policy)?)?;
        let k = self.expand_to_heads(&self.k_proj.forward(key, &self.policy)?)?;
        let v = self.expand_to_heads(&self.v_proj.forward(value, &self.policy)?)?;

        let head_mask = match mask {
            Some(mask) if mask.rank() == 3 => Some(mask.unsqueeze(1)?),
            Some(mask) if mask.rank() == 2 => Some(mask.unsqueeze(0)?.unsqueeze(0)?),
            Some(mask) => bail!(
                "attention.mask expected rank 2 or 3, got {:?}",
                mask.dims()
            ),
            None => None,
        };

        let output = self
            .attention
            .attend(&q, &k, &v, head_mask.as_ref())
            .map_err(Error::from)?;
        if let Ok(mut slot) = self.last_attention.lock() {
            *slot = Some(output.weights.clone());
        }

        let merged = self.merge_from_heads(&output.context)?;
        self.out_proj.forward(&merged, &self.policy)
    }

    fn expand_to_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = tensor.dims3()?;
        tensor
            .reshape((batch, seq, self.config.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn merge_from_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, heads, seq, head_dim) = tensor.dims4()?;
        if heads != self.config.heads || head_dim != self.head_dim {
            bail!(
                "attention output expected [batch, {}, seq, {}] got {:?}",
                self.config.heads,
                self.head_dim,
                tensor.dims()
            );
        }
        tensor
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, self.config.d_model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::subsequent_mask;
    use rand::SeedableRng;

    fn build(d_model: usize, heads: usize) -> Result<MultiHeadAttention> {
        let mut rng = StdRng::seed_from_u64(11);
        MultiHeadAttention::new(
            MultiHeadConfig::new(d_model, heads, 0.0),
            &mut rng,
            &Device::Cpu,
            DType::F32,
        )
    }

    #[test]
    fn rejects_indivisible_model_width() {
        let err = build(10, 3).unwrap_err();
        assert!(err.to_string().contains("not divisible"));
        assert!(build(8, 0).is_err());
    }

    #[test]
    fn preserves_batch_seq_hidden_shape() -> Result<()> {
        let mha = build(8, 2)?;
        let query = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
        let memory = Tensor::randn(0f32, 1.0, (2, 5, 8), &Device::Cpu)?;
        let out = mha.forward(&query, &memory, &memory, None)?;
        assert_eq!(out.dims(), &[2, 3, 8]);

        let weights = mha.last_attention().expect("weights recorded");
        assert_eq!(weights.dims(), &[2, 2, 3, 5]);
        Ok(())
    }

    #[test]
    fn causal_mask_zeroes_future_weights_in_every_head() -> Result<()> {
        let mha = build(8, 4)?;
        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &Device::Cpu)?;
        let mask = subsequent_mask(&Device::Cpu, 4)?;
        mha.forward(&x, &x, &x, Some(&mask))?;

        let weights = mha.last_attention().expect("weights recorded");
        let rows = weights.flatten_to(2)?.to_vec2::<f32>()?;
        assert_eq!(rows.len(), 16);
        for (idx, row) in rows.iter().enumerate() {
            let query = idx % 4;
            let total: f32 = row.iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
            assert!(row[query + 1..].iter().all(|w| *w < 1e-12));
        }
        Ok(())
    }

    #[test]
    fn single_head_matches_plain_kernel() -> Result<()> {
        let mha = build(4, 1)?;
        let x = Tensor::randn(0f32, 1.0, (1, 3, 4), &Device::Cpu)?;
        let out = mha.forward(&x, &x, &x, None)?;

        let q = mha.q_proj.forward(&x, &mha.policy)?;
        let k = mha.k_proj.forward(&x, &mha.policy)?;
        let v = mha.v_proj.forward(&x, &mha.policy)?;
        let (context, _) = crate::scaled_dot_product_attention(&q, &k, &v, None, None)?;
        let expected = mha.out_proj.forward(&context, &mha.policy)?;

        let diff = out.sub(&expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn exposes_four_projections() -> Result<()> {
        let mha = build(8, 2)?;
        let names: Vec<String> = mha.named_parameters("attn").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"attn.q_proj.weight".to_string()));
        assert!(names.contains(&"attn.out_proj.bias".to_string()));
        Ok(())
    }

    #[test]
    fn rejects_wrong_hidden_width() -> Result<()> {
        let mha = build(8, 2)?;
        let x = Tensor::zeros((1, 3, 6), DType::F32, &Device::Cpu)?;
        assert!(mha.forward(&x, &x, &x, None).is_err());
        Ok(())
    }
}
