//! Position-wise feed-forward network.
//!
//! `FFN(x) = W2(dropout(act(W1(x))))`, applied independently at every
//! position of a `(batch, seq, d_model)` tensor. The inner projection expands
//! to `d_ff` features and the outer one contracts back to `d_model`.

use candle_core::{DType, Device, Result, Tensor, Var};
use rand::{rngs::StdRng, Rng};

use crate::{
    activations::ActivationKind,
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    init::ParamInit,
    linear::{Linear, LinearConfig},
};

/// Configuration for [`PositionwiseFeedForward`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub d_model: usize,
    /// Width of the inner activation space.
    pub d_ff: usize,
    /// Activation between the two projections.
    pub activation: ActivationKind,
    /// Dropout applied to the activations.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    /// ReLU feed-forward block.
    pub fn new(d_model: usize, d_ff: usize, dropout_p: f32) -> Self {
        Self {
            d_model,
            d_ff,
            activation: ActivationKind::Relu,
            dropout_p,
        }
    }
}

#[derive(Debug)]
pub struct PositionwiseFeedForward {
    config: FeedForwardConfig,
    w_1: Linear,
    w_2: Linear,
    dropout: Dropout,
}

impl PositionwiseFeedForward {
    /// Builds both projections with Xavier weights; the dropout seed is drawn from `rng`.
    pub fn new(
        config: FeedForwardConfig,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let w_1 = Linear::with_init(
            LinearConfig::new(config.d_model, config.d_ff),
            ParamInit::XavierUniform,
            rng,
            device,
            dtype,
        )?;
        let w_2 = Linear::with_init(
            LinearConfig::new(config.d_ff, config.d_model),
            ParamInit::XavierUniform,
            rng,
            device,
            dtype,
        )?;
        let dropout = Dropout::new(config.dropout_p, rng.gen())?;
        Ok(Self {
            config,
            w_1,
            w_2,
            dropout,
        })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.w_1.named_parameters(&format!("{scope}.w_1"));
        params.extend(self.w_2.named_parameters(&format!("{scope}.w_2")));
        params
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("feed_forward.input", hidden, self.config.d_model)?;
        let inner = self.w_1.forward(hidden, policy)?;
        let activated = self.config.activation.forward(&inner, policy)?;
        let dropped = self.dropout.forward(&activated, policy)?;
        self.w_2.forward(&dropped, policy)
    }
}
