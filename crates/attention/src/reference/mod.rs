//! Portable, exact scaled dot-product attention.
//!
//! This path favours clarity over raw speed and is the kernel used by
//! [`MultiHeadAttention`](crate::multihead::MultiHeadAttention).

pub mod exact;

pub use exact::{scaled_dot_product_attention, ExactAttention};
