use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest per-step loss reported by the scorer.
pub const MAX_STEP_LOSS: f32 = 45.0;

/// Gradient clipping threshold used unless configured otherwise.
pub const DEFAULT_GRADIENT_CLIP_NORM: f32 = 5.0;

/// Rejected configuration values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A dimension is zero.
    #[error("{0} must be greater than zero")]
    ZeroDimension(&'static str),
    /// The start token is not a valid token id.
    #[error("start token {start_token} is outside the vocabulary of size {vocab_size}")]
    StartTokenOutOfRange {
        /// Configured start token.
        start_token: usize,
        /// Configured vocabulary size.
        vocab_size: usize,
    },
    /// A rate, norm or deviation is negative, zero where not allowed, or not finite.
    #[error("{name} has invalid value {value}")]
    InvalidValue {
        /// Field name.
        name: &'static str,
        /// Rejected value.
        value: f32,
    },
}

/// Construction options of a [`crate::Generator`].
///
/// Dimensions are fixed for the generator's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Number of distinct tokens.
    pub vocab_size: usize,
    /// Embedding width.
    pub emb_dim: usize,
    /// LSTM hidden and cell width.
    pub hidden_dim: usize,
    /// Tokens per sequence.
    pub seq_len: usize,
    /// Sequences per batch.
    pub batch_size: usize,
    /// Token fed at step 0 of both the sampler and the scorer.
    pub start_token: usize,
    /// Learning rate of the maximum-likelihood update.
    pub pretrain_learning_rate: f32,
    /// Learning rate of the reward-weighted update.
    pub adversarial_learning_rate: f32,
    /// Maximum global L2 norm of a gradient before it is applied.
    pub gradient_clip_norm: f32,
    /// Standard deviation of the normal initializer.
    pub init_stddev: f32,
    /// Seed for initialization and sampling; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            vocab_size: 5000,
            emb_dim: 32,
            hidden_dim: 32,
            seq_len: 20,
            batch_size: 64,
            start_token: 0,
            pretrain_learning_rate: 0.01,
            adversarial_learning_rate: 0.01,
            gradient_clip_norm: DEFAULT_GRADIENT_CLIP_NORM,
            init_stddev: 0.1,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, dim) in [
            ("vocab_size", self.vocab_size),
            ("emb_dim", self.emb_dim),
            ("hidden_dim", self.hidden_dim),
            ("seq_len", self.seq_len),
            ("batch_size", self.batch_size),
        ] {
            if dim == 0 {
                return Err(ConfigError::ZeroDimension(name));
            }
        }
        if self.start_token >= self.vocab_size {
            return Err(ConfigError::StartTokenOutOfRange {
                start_token: self.start_token,
                vocab_size: self.vocab_size,
            });
        }
        for (name, value) in [
            ("pretrain_learning_rate", self.pretrain_learning_rate),
            ("adversarial_learning_rate", self.adversarial_learning_rate),
            ("gradient_clip_norm", self.gradient_clip_norm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidValue { name, value });
            }
        }
        if !self.init_stddev.is_finite() || self.init_stddev < 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "init_stddev",
                value: self.init_stddev,
            });
        }
        Ok(())
    }

    /// Shape of a token or reward batch, `[batch_size, seq_len]`.
    pub const fn batch_shape(&self) -> [usize; 2] {
        [self.batch_size, self.seq_len]
    }
}
