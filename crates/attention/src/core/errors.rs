//! Error types emitted by attention implementations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },
    /// Invalid run-time configuration.
    #[error("invalid attention config: {0}")]
    Config(String),
    /// Failure raised by the tensor runtime.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }
}

impl From<AttentionError> for candle_core::Error {
    fn from(err: AttentionError) -> Self {
        match err {
            AttentionError::Backend(inner) => inner,
            other => candle_core::Error::Msg(other.to_string()),
        }
    }
}
