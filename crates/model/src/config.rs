use std::{fs, path::Path};

use candle_core::{DType, Device};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_N_LAYERS: usize = 6;
pub const DEFAULT_D_MODEL: usize = 512;
pub const DEFAULT_D_FF: usize = 2048;
pub const DEFAULT_N_HEADS: usize = 8;
pub const DEFAULT_DROPOUT: f32 = 0.1;
pub const DEFAULT_MAX_LEN: usize = embedding::DEFAULT_MAX_LEN;
pub const DEFAULT_NORM_EPS: f64 = layers::norm::DEFAULT_EPSILON;

/// High-level configuration for assembling the encoder-decoder transformer.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub src_vocab: usize,
    pub tgt_vocab: usize,
    /// Layers per stack; the encoder and decoder use the same depth.
    pub n_layers: usize,
    pub d_model: usize,
    pub d_ff: usize,
    pub n_heads: usize,
    /// Shared by embeddings, attention probabilities, residual branches and the feed-forward inner layer.
    pub dropout: f32,
    /// Positions covered by the sinusoidal table.
    pub max_len: usize,
    pub norm_eps: f64,
    /// Seed for parameter init and dropout masks; `None` draws from entropy.
    pub seed: Option<u64>,
    pub dtype: DType,
    pub device: Device,
}

impl ModelConfig {
    /// Base-model hyperparameters for the given vocabularies, on CPU in `f32`.
    pub fn new(src_vocab: usize, tgt_vocab: usize) -> Self {
        Self {
            src_vocab,
            tgt_vocab,
            n_layers: DEFAULT_N_LAYERS,
            d_model: DEFAULT_D_MODEL,
            d_ff: DEFAULT_D_FF,
            n_heads: DEFAULT_N_HEADS,
            dropout: DEFAULT_DROPOUT,
            max_len: DEFAULT_MAX_LEN,
            norm_eps: DEFAULT_NORM_EPS,
            seed: None,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    /// Reads [`ModelOverrides`] from a `.json` or `.toml` file and applies them
    /// on top of [`ModelConfig::new`]. The vocabularies must come from the file.
    pub fn from_path(path: impl AsRef<Path>, device: Device) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let overrides: ModelOverrides = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ConfigError::Format(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let mut config = Self::new(0, 0);
        config.device = device;
        config.apply(&overrides);
        config.validate()?;
        log::debug!("loaded model config from {}", path.display());
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &ModelOverrides) {
        if let Some(value) = overrides.src_vocab {
            self.src_vocab = value;
        }
        if let Some(value) = overrides.tgt_vocab {
            self.tgt_vocab = value;
        }
        if let Some(value) = overrides.n_layers {
            self.n_layers = value;
        }
        if let Some(value) = overrides.d_model {
            self.d_model = value;
        }
        if let Some(value) = overrides.d_ff {
            self.d_ff = value;
        }
        if let Some(value) = overrides.n_heads {
            self.n_heads = value;
        }
        if let Some(value) = overrides.dropout {
            self.dropout = value;
        }
        if let Some(value) = overrides.max_len {
            self.max_len = value;
        }
        if let Some(value) = overrides.norm_eps {
            self.norm_eps = value;
        }
        if overrides.seed.is_some() {
            self.seed = overrides.seed;
        }
        if let Some(precision) = overrides.precision {
            self.dtype = precision.dtype();
        }
    }

    /// Per-head width; only meaningful once [`ModelConfig::validate`] passes.
    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads.max(1)
    }

    /// Collects every structural violation instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (label, value) in [
            ("src_vocab", self.src_vocab),
            ("tgt_vocab", self.tgt_vocab),
            ("n_layers", self.n_layers),
            ("d_model", self.d_model),
            ("d_ff", self.d_ff),
            ("n_heads", self.n_heads),
            ("max_len", self.max_len),
        ] {
            if value == 0 {
                errors.push(format!("{label} must be greater than 0"));
            }
        }

        if self.n_heads > 0 && self.d_model % self.n_heads != 0 {
            errors.push(format!(
                "d_model ({}) must be divisible by n_heads ({})",
                self.d_model, self.n_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            errors.push(format!("dropout must be in [0, 1) (got {})", self.dropout));
        }
        if !(self.norm_eps.is_finite() && self.norm_eps > 0.0) {
            errors.push(format!("norm_eps must be positive (got {})", self.norm_eps));
        }
        if !matches!(self.dtype, DType::F32 | DType::F16 | DType::BF16) {
            errors.push(format!("unsupported dtype {:?}", self.dtype));
        }

        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        Ok(())
    }
}

/// File-level overrides; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelOverrides {
    #[serde(default)]
    pub src_vocab: Option<usize>,
    #[serde(default)]
    pub tgt_vocab: Option<usize>,
    #[serde(default)]
    pub n_layers: Option<usize>,
    #[serde(default)]
    pub d_model: Option<usize>,
    #[serde(default)]
    pub d_ff: Option<usize>,
    #[serde(default)]
    pub n_heads: Option<usize>,
    #[serde(default)]
    pub dropout: Option<f32>,
    #[serde(default)]
    pub max_len: Option<usize>,
    #[serde(default)]
    pub norm_eps: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub precision: Option<Precision>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Fp32,
    Fp16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::Fp32 => DType::F32,
            Precision::Fp16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse config: {0}")]
    Format(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl From<ConfigError> for candle_core::Error {
    fn from(value: ConfigError) -> Self {
        candle_core::Error::Msg(value.to_string())
    }
}
