//! Keep-mask builders shared by attention callers.
//!
//! All masks produced here have dtype [`MASK_DTYPE`] (`u8`). A `1` marks a
//! key position the query may attend to and a `0` marks one it must ignore.
//! Masks are shaped so they broadcast against `(batch, q_len, k_len)` scores;
//! [`MultiHeadAttention`](crate::multihead::MultiHeadAttention) inserts the head
//! axis itself.

pub mod causal;
pub mod padding;

use candle_core::DType;

/// Dtype shared by all keep-masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use causal::{build_causal_mask, subsequent_mask};
pub use padding::{padding_mask, padding_mask_from_lengths, target_mask};
