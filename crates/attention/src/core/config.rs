//! Run-time knobs shared by attention implementations.

/// Dtype used for the score matrix and softmax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorePrecision {
    /// Promote `q`, `k`, `v` to `f32` before computing scores.
    #[default]
    ForceF32,
    /// Compute in the dtype of the inputs.
    Inherit,
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Dropout applied to attention probabilities during training.
    ///
    /// `None` or `Some(0.0)` disables dropout.
    pub dropout_p: Option<f32>,
    /// Precision used for scores and softmax.
    pub precision: ScorePrecision,
    /// Value written into masked score positions before the softmax.
    pub mask_fill: f64,
}

/// Large negative fill that behaves like `-inf` without producing NaNs on fully masked rows.
pub const DEFAULT_MASK_FILL: f64 = -1e9;

impl Default for Config {
    fn default() -> Self {
        Self {
            dropout_p: None,
            precision: ScorePrecision::default(),
            mask_fill: DEFAULT_MASK_FILL,
        }
    }
}

impl Config {
    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = Some(dropout_p);
        self
    }
}
