//! Decoder stack: `N` x (masked self-attention, cross-attention over the
//! encoder memory, feed-forward), each behind its own residual wrapper.

use attention::{MultiHeadAttention, MultiHeadConfig};
use candle_core::{Result, Tensor, Var};
use layers::{
    FeedForwardConfig, LayerNorm, NormConfig, PositionwiseFeedForward, PrecisionPolicy,
    SublayerConnection,
};
use rand::rngs::StdRng;

use crate::config::ModelConfig;

#[derive(Debug)]
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    src_attn: MultiHeadAttention,
    feed_forward: PositionwiseFeedForward,
    sublayers: [SublayerConnection; 3],
    policy: PrecisionPolicy,
}

impl DecoderLayer {
    pub fn new(index: usize, config: &ModelConfig, rng: &mut StdRng) -> Result<Self> {
        let (device, dtype) = (&config.device, config.dtype);
        let attn_config = MultiHeadConfig::new(config.d_model, config.n_heads, config.dropout);
        let self_attn = MultiHeadAttention::new(attn_config.clone(), rng, device, dtype)?;
        let src_attn = MultiHeadAttention::new(attn_config, rng, device, dtype)?;
        let feed_forward = PositionwiseFeedForward::new(
            FeedForwardConfig::new(config.d_model, config.d_ff, config.dropout),
            rng,
            device,
            dtype,
        )?;
        let norm = NormConfig::new(config.d_model).with_epsilon(config.norm_eps);
        let sublayers = [
            SublayerConnection::new(norm.clone(), config.dropout, rng, device, dtype)?,
            SublayerConnection::new(norm.clone(), config.dropout, rng, device, dtype)?,
            SublayerConnection::new(norm, config.dropout, rng, device, dtype)?,
        ];
        log::debug!("decoder layer {index} built");

        Ok(Self {
            self_attn,
            src_attn,
            feed_forward,
            sublayers,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    pub fn self_attn(&self) -> &MultiHeadAttention {
        &self.self_attn
    }

    pub fn src_attn(&self) -> &MultiHeadAttention {
        &self.src_attn
    }

    pub fn set_training(&self, training: bool) {
        self.self_attn.set_training(training);
        self.src_attn.set_training(training);
        self.feed_forward.set_training(training);
        self.sublayers.iter().for_each(|s| s.set_training(training));
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.self_attn.named_parameters(&format!("{scope}.self_attn"));
        params.extend(self.src_attn.named_parameters(&format!("{scope}.src_attn")));
        params.extend(self.feed_forward.named_parameters(&format!("{scope}.feed_forward")));
        for (idx, sublayer) in self.sublayers.iter().enumerate() {
            params.extend(sublayer.named_parameters(&format!("{scope}.sublayer.{idx}")));
        }
        params
    }

    /// `memory` is the encoder output; `tgt_mask` must hide future positions.
    pub fn forward(
        &self,
        hidden: &Tensor,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let hidden = self.sublayers[0].forward(hidden, &self.policy, |normed| {
            self.self_attn.forward(normed, normed, normed, tgt_mask)
        })?;
        let hidden = self.sublayers[1].forward(&hidden, &self.policy, |normed| {
            self.src_attn.forward(normed, memory, memory, src_mask)
        })?;
        self.sublayers[2].forward(&hidden, &self.policy, |normed| {
            self.feed_forward.forward(normed, &self.policy)
        })
    }
}

#[derive(Debug)]
pub struct Decoder {
    layers: Vec<DecoderLayer>,
    norm: LayerNorm,
    policy: PrecisionPolicy,
}

impl Decoder {
    pub fn new(config: &ModelConfig, rng: &mut StdRng) -> Result<Self> {
        let layers = (0..config.n_layers)
            .map(|index| DecoderLayer::new(index, config, rng))
            .collect::<Result<Vec<_>>>()?;
        let norm = LayerNorm::with_defaults(
            NormConfig::new(config.d_model).with_epsilon(config.norm_eps),
            rng,
            &config.device,
            config.dtype,
        )?;
        Ok(Self {
            layers,
            norm,
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
        })
    }

    pub fn layers(&self) -> &[DecoderLayer] {
        &self.layers
    }

    pub fn set_training(&self, training: bool) {
        self.layers.iter().for_each(|layer| layer.set_training(training));
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params: Vec<(String, Var)> = self
            .layers
            .iter()
            .enumerate()
            .flat_map(|(idx, layer)| layer.named_parameters(&format!("{scope}.layers.{idx}")))
            .collect();
        params.extend(self.norm.named_parameters(&format!("{scope}.norm")));
        params
    }

    pub fn forward(
        &self,
        hidden: &Tensor,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let mut hidden = hidden.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, memory, src_mask, tgt_mask)?;
        }
        self.norm.forward(&hidden, &self.policy)
    }
}
