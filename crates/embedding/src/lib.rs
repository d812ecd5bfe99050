//! Embedding crate
//!
//! [`token::TokenEmbedding`] maps integer ids to `sqrt(d_model)`-scaled
//! vectors, [`positional::PositionalEncoding`] adds the fixed sinusoidal
//! signal and [`sequence::SequenceEmbedding`] chains the two for the encoder
//! and decoder inputs.

pub mod positional;
pub mod sequence;
pub mod token;

pub use positional::*;
pub use sequence::*;
pub use token::*;
