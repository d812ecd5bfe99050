//! Core traits and types shared across attention implementations.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, ScorePrecision};
pub use errors::AttentionError;

/// Result of one attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Attended values, shaped `[..., q_len, v_dim]` in the dtype of `q`.
    pub context: Tensor,
    /// Probabilities over key positions, shaped `[..., q_len, k_len]`.
    ///
    /// These are the softmax outputs before dropout, so every row sums to one.
    pub weights: Tensor,
}

/// Unified interface for attention kernels.
///
/// * `q` is `[..., q_len, d_k]`, `k` is `[..., k_len, d_k]` and `v` is
///   `[..., k_len, d_v]`; leading dimensions must agree.
/// * `mask`, when present, must broadcast to `[..., q_len, k_len]`; zero
///   entries are excluded from the softmax.
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError>;
}
