//! Building blocks for the encoder-decoder transformer.
//!
//! Every layer consumes hidden states laid out as `(batch, seq, hidden)` and
//! returns the same layout unless documented otherwise. Parameters are stored
//! as [`candle_core::Var`] so gradients flow back to them when a caller runs
//! `backward()` on a downstream loss. Mixed precision is handled uniformly
//! through [`dtypes::PrecisionPolicy`].

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod init;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

pub use dropout::Dropout;
pub use dtypes::PrecisionPolicy;
pub use init::ParamInit;
pub use linear::{Linear, LinearConfig};
pub use mlp::{FeedForwardConfig, PositionwiseFeedForward};
pub use norm::{LayerNorm, NormConfig};
pub use residual::SublayerConnection;
