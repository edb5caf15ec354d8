//! Demo driver: trains on a synthetic counting corpus and samples from checkpoints.

use seqgan_generator::{Generator, GeneratorConfig, GeneratorError, Tensor, TrainingState};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

// --- Configuration Structs ---

#[derive(Parser, Debug, Clone)]
struct ModelConfig {
    #[clap(long, default_value = "8", help = "Number of distinct tokens")]
    vocab_size: usize,
    #[clap(long, default_value = "16", help = "Dimension of token embeddings")]
    emb_dim: usize,
    #[clap(long, default_value = "32", help = "LSTM hidden size")]
    hidden_dim: usize,
    #[clap(long, default_value = "12", help = "Tokens per sequence")]
    seq_len: usize,
    #[clap(long, default_value = "16", help = "Sequences per batch")]
    batch_size: usize,
    #[clap(long, default_value = "0", help = "Token fed at the first step")]
    start_token: usize,
    #[clap(long, help = "Seed for initialization and sampling")]
    seed: Option<u64>,
}

impl ModelConfig {
    fn to_generator_config(&self, train: Option<&TrainConfig>) -> GeneratorConfig {
        let mut config = GeneratorConfig {
            vocab_size: self.vocab_size,
            emb_dim: self.emb_dim,
            hidden_dim: self.hidden_dim,
            seq_len: self.seq_len,
            batch_size: self.batch_size,
            start_token: self.start_token,
            seed: self.seed,
            ..GeneratorConfig::default()
        };
        if let Some(train) = train {
            config.pretrain_learning_rate = train.pretrain_lr;
            config.adversarial_learning_rate = train.adversarial_lr;
            config.gradient_clip_norm = train.clip_norm;
        }
        config
    }
}

#[derive(Parser, Debug, Clone)]
struct TrainConfig {
    #[clap(long, default_value = "checkpoint.bin", help = "Where to write the final checkpoint")]
    out: PathBuf,
    #[clap(long, default_value = "300", help = "Maximum-likelihood steps")]
    pretrain_steps: usize,
    #[clap(long, default_value = "50", help = "Reward-weighted steps")]
    adversarial_steps: usize,
    #[clap(long, default_value = "0.01", help = "Pretrain learning rate")]
    pretrain_lr: f32,
    #[clap(long, default_value = "0.005", help = "Adversarial learning rate")]
    adversarial_lr: f32,
    #[clap(long, default_value = "5.0", help = "Global gradient norm limit")]
    clip_norm: f32,
    #[clap(long, default_value = "25", help = "Log every N steps")]
    log_every: usize,
}

#[derive(Parser, Debug, Clone)]
struct SampleConfig {
    #[clap(long, default_value = "checkpoint.bin", help = "Checkpoint written by `train`")]
    checkpoint: PathBuf,
    #[clap(long, help = "Seed for sampling")]
    seed: Option<u64>,
}

// --- CLI Commands ---

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
enum Cli {
    /// Pretrain on a synthetic counting corpus, then run reward-weighted steps
    Train {
        #[clap(flatten)]
        model_config: ModelConfig,
        #[clap(flatten)]
        train_config: TrainConfig,
    },
    /// Print a batch sampled from a checkpoint
    Sample {
        #[clap(flatten)]
        sample_config: SampleConfig,
    },
}

// --- Errors ---

#[derive(Error, Debug)]
enum AppError {
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Configuration and training state, written as one bincode blob.
#[derive(Serialize, Deserialize)]
struct Checkpoint {
    config: GeneratorConfig,
    state: TrainingState,
}

// --- Synthetic data and reward ---

/// Rows count upward modulo the vocabulary from a random offset.
fn counting_batch<R: Rng>(rng: &mut R, config: &GeneratorConfig) -> Result<Tensor<usize>, GeneratorError> {
    let mut blob = Vec::with_capacity(config.batch_size * config.seq_len);
    for _ in 0..config.batch_size {
        let offset = rng.gen_range(0..config.vocab_size);
        blob.extend((0..config.seq_len).map(|j| (offset + j) % config.vocab_size));
    }
    Ok(Tensor::raw(&config.batch_shape(), blob)?)
}

/// 1.0 where a token continues the count, 0.0 elsewhere. The first step is free.
fn counting_reward(tokens: &Tensor<usize>, config: &GeneratorConfig) -> Result<Tensor<f32>, GeneratorError> {
    let blob = tokens
        .blob()
        .chunks(config.seq_len)
        .flat_map(|row| {
            (0..row.len()).map(move |j| {
                if j == 0 || row[j] == (row[j - 1] + 1) % config.vocab_size {
                    1.0
                } else {
                    0.0
                }
            })
        })
        .collect();
    Ok(Tensor::raw(&config.batch_shape(), blob)?)
}

fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), AppError> {
    info!(path = %path.display(), "saving checkpoint");
    let bytes = bincode::serialize(checkpoint)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, &bytes)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn load_checkpoint(path: &Path) -> Result<Checkpoint, AppError> {
    info!(path = %path.display(), "loading checkpoint");
    Ok(bincode::deserialize(&fs::read(path)?)?)
}

// --- Main Logic ---

fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse() {
        Cli::Train {
            model_config,
            train_config,
        } => run_training(&model_config, &train_config),
        Cli::Sample { sample_config } => run_sampling(&sample_config),
    }
}

fn run_training(model_config: &ModelConfig, train_config: &TrainConfig) -> Result<(), AppError> {
    let config = model_config.to_generator_config(Some(train_config));
    let mut generator = Generator::new(config.clone())?;
    let mut data_rng = config
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    info!(num_params = generator.num_params(), "generator ready");

    let log_every = train_config.log_every.max(1);
    let timer = Instant::now();
    for step in 0..train_config.pretrain_steps {
        let batch = counting_batch(&mut data_rng, &config)?;
        let loss = generator.pretrain_step(&batch)?;
        if step % log_every == 0 {
            info!(step, loss, elapsed_s = timer.elapsed().as_secs_f32(), "pretrain");
        }
    }

    for step in 0..train_config.adversarial_steps {
        let samples = generator.generate()?;
        let rewards = counting_reward(&samples, &config)?;
        let mean_reward = rewards.sum() / rewards.size() as f32;
        let loss = generator.adversarial_step(&samples, &rewards)?;
        if step % log_every == 0 {
            info!(step, loss, mean_reward, "adversarial");
        }
    }

    save_checkpoint(
        &train_config.out,
        &Checkpoint {
            config,
            state: generator.training_state(),
        },
    )
}

fn run_sampling(sample_config: &SampleConfig) -> Result<(), AppError> {
    let checkpoint = load_checkpoint(&sample_config.checkpoint)?;
    let mut generator = Generator::new(checkpoint.config)?;
    generator.set_training_state(checkpoint.state, false)?;
    if let Some(seed) = sample_config.seed {
        generator.reseed(seed);
    }

    let tokens = generator.generate()?;
    for row in tokens.blob().chunks(generator.config().seq_len) {
        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_round_trip() {
        let config = GeneratorConfig {
            vocab_size: 4,
            emb_dim: 3,
            hidden_dim: 3,
            seq_len: 5,
            batch_size: 2,
            seed: Some(8),
            ..GeneratorConfig::default()
        };
        let generator = Generator::new(config.clone()).unwrap();
        let path = std::env::temp_dir().join(format!("seqgan-checkpoint-{}.bin", std::process::id()));
        save_checkpoint(
            &path,
            &Checkpoint {
                config: config.clone(),
                state: generator.training_state(),
            },
        )
        .unwrap();

        let loaded = load_checkpoint(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.state, generator.training_state());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_counting_reward_marks_continuations() {
        let config = GeneratorConfig {
            vocab_size: 4,
            seq_len: 4,
            batch_size: 2,
            ..GeneratorConfig::default()
        };
        let tokens = Tensor::raw(&[2, 4], vec![2, 3, 0, 2, 1, 1, 2, 3]).unwrap();
        let rewards = counting_reward(&tokens, &config).unwrap();
        assert_eq!(rewards.blob(), &[1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    }
}
