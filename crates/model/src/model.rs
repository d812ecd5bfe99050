use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{Result, Tensor, Var};
use embedding::SequenceEmbedding;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::ModelConfig,
    decoder::Decoder,
    encoder::Encoder,
    generator::Generator,
};

/// Encoder-decoder transformer assembled from the shared crates.
///
/// [`EncoderDecoder::forward`] returns the decoder hidden states; apply
/// [`EncoderDecoder::generator`] (or call [`EncoderDecoder::log_probs`]) to
/// obtain per-token log-probabilities.
#[derive(Debug)]
pub struct EncoderDecoder {
    config: ModelConfig,
    src_embed: SequenceEmbedding,
    tgt_embed: SequenceEmbedding,
    encoder: Encoder,
    decoder: Decoder,
    generator: Generator,
    training: AtomicBool,
}

impl EncoderDecoder {
    /// Builds every component from `config`; parameters are drawn from one
    /// RNG so a fixed `seed` reproduces the whole model.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (device, dtype) = (&config.device, config.dtype);

        let src_embed = SequenceEmbedding::new(
            config.src_vocab,
            config.d_model,
            config.max_len,
            config.dropout,
            &mut rng,
            device,
            dtype,
        )?;
        let tgt_embed = SequenceEmbedding::new(
            config.tgt_vocab,
            config.d_model,
            config.max_len,
            config.dropout,
            &mut rng,
            device,
            dtype,
        )?;
        let encoder = Encoder::new(&config, &mut rng)?;
        let decoder = Decoder::new(&config, &mut rng)?;
        let generator = Generator::new(config.d_model, config.tgt_vocab, &mut rng, device, dtype)?;

        let model = Self {
            config,
            src_embed,
            tgt_embed,
            encoder,
            decoder,
            generator,
            training: AtomicBool::new(true),
        };
        log::info!(
            "encoder-decoder built: layers={} d_model={} d_ff={} heads={} dropout={} params={} dtype={:?}",
            model.config.n_layers,
            model.config.d_model,
            model.config.d_ff,
            model.config.n_heads,
            model.config.dropout,
            model.num_parameters(),
            model.config.dtype
        );
        Ok(model)
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn src_embed(&self) -> &SequenceEmbedding {
        &self.src_embed
    }

    pub fn tgt_embed(&self) -> &SequenceEmbedding {
        &self.tgt_embed
    }

    /// Encodes `(batch, src_len)` token ids into `(batch, src_len, d_model)` memory.
    pub fn encode(&self, src: &Tensor, src_mask: Option<&Tensor>) -> Result<Tensor> {
        let embedded = self.src_embed.forward(src)?;
        self.encoder.forward(&embedded, src_mask)
    }

    /// Decodes `(batch, tgt_len)` token ids against `memory`.
    pub fn decode(
        &self,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt: &Tensor,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let embedded = self.tgt_embed.forward(tgt)?;
        self.decoder.forward(&embedded, memory, src_mask, tgt_mask)
    }

    /// Encodes `src` and decodes `tgt`, returning `(batch, tgt_len, d_model)` hidden states.
    pub fn forward(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let memory = self.encode(src, src_mask)?;
        self.decode(&memory, src_mask, tgt, tgt_mask)
    }

    /// [`EncoderDecoder::forward`] followed by the generator.
    pub fn log_probs(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let hidden = self.forward(src, tgt, src_mask, tgt_mask)?;
        self.generator.forward(&hidden)
    }

    /// Enables dropout everywhere.
    pub fn train(&self) {
        self.set_training(true);
    }

    /// Disables dropout; forward passes become deterministic.
    pub fn eval(&self) {
        self.set_training(false);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
        self.src_embed.set_training(training);
        self.tgt_embed.set_training(training);
        self.encoder.set_training(training);
        self.decoder.set_training(training);
        log::debug!("encoder-decoder training={training}");
    }

    /// Every trainable parameter with a dotted path name.
    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.src_embed.named_parameters("src_embed");
        params.extend(self.tgt_embed.named_parameters("tgt_embed"));
        params.extend(self.encoder.named_parameters("encoder"));
        params.extend(self.decoder.named_parameters("decoder"));
        params.extend(self.generator.named_parameters("generator"));
        params
    }

    pub fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, var)| var.elem_count())
            .sum()
    }
}

/// Builds a model from the classic hyperparameter list.
///
/// Parameters are seeded from entropy; use [`EncoderDecoder::new`] with
/// [`ModelConfig::seed`] for a reproducible model.
pub fn make_model(
    src_vocab: usize,
    tgt_vocab: usize,
    n: usize,
    d_model: usize,
    d_ff: usize,
    h: usize,
    dropout: f32,
) -> Result<EncoderDecoder> {
    let mut config = ModelConfig::new(src_vocab, tgt_vocab);
    config.n_layers = n;
    config.d_model = d_model;
    config.d_ff = d_ff;
    config.n_heads = h;
    config.dropout = dropout;
    config.seed = Some(rand::thread_rng().gen());
    EncoderDecoder::new(config)
}
