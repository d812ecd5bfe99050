//! Encoder-decoder transformer.
//!
//! ```text
//! src ids -> SequenceEmbedding -> Encoder ──memory──┐
//! tgt ids -> SequenceEmbedding -> Decoder <─────────┘ -> Generator -> log p(tgt)
//! ```
//!
//! [`make_model`] mirrors the classic factory signature; [`EncoderDecoder::new`]
//! takes a [`ModelConfig`], which can also be loaded from JSON or TOML with
//! [`ModelConfig::from_path`].

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod generator;
pub mod model;

pub use config::{ConfigError, ModelConfig, ModelOverrides, Precision};
pub use decoder::{Decoder, DecoderLayer};
pub use encoder::{Encoder, EncoderLayer};
pub use generator::Generator;
pub use model::{make_model, EncoderDecoder};
