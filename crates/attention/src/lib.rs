//! Attention primitives for the encoder-decoder transformer.
//!
//! [`reference::scaled_dot_product_attention`] computes
//! `softmax(Q K^T / sqrt(d_k)) V` over tensors laid out as
//! `[..., seq_len, head_dim]` and returns both the attended values and the
//! probability matrix. [`multihead::MultiHeadAttention`] projects
//! `(batch, seq, d_model)` inputs into `h` heads, runs the reference kernel on
//! all heads at once and projects the concatenation back to `d_model`.
//!
//! Masks are keep-masks: non-zero entries mark key positions a query may
//! attend to. Helpers in [`masks`] build the usual padding and subsequent
//! (causal) masks. Masked scores are replaced by [`core::Config::mask_fill`]
//! (`-1e9` by default) before the softmax.
//!
//! Dropout on the attention probabilities is a training-only concern; call
//! `set_training(false)` for deterministic evaluation.

pub mod core;
pub mod masks;
pub mod multihead;
pub mod reference;

pub use core::{Attention, AttentionError, AttentionOutput, Config};
pub use multihead::{MultiHeadAttention, MultiHeadConfig};
pub use reference::{scaled_dot_product_attention, ExactAttention};
