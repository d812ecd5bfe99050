//! Fixed positional signals added to token embeddings.

pub mod sinusoidal;

pub use sinusoidal::{PositionalEncoding, PositionalEncodingConfig, DEFAULT_MAX_LEN};
