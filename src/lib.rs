#![warn(missing_docs)]

//! # seqgan-generator
//!
//! `seqgan-generator` is the sequence-generation half of an adversarial
//! text-generation setup: an LSTM language model that samples token
//! sequences and is trained both by maximum likelihood and by a
//! policy-gradient objective driven by externally supplied per-token rewards.
//!
//! ## Key Components:
//!
//! *   [`Generator`]: the model. Use it to sample batches, run pretraining
//!     steps and run adversarial steps.
//! *   [`GeneratorConfig`]: dimensions, start token, learning rates and the
//!     gradient clipping threshold, all fixed at construction.
//! *   [`ParameterSet`]: the explicit record of every trainable tensor.
//! *   [`cell`]: the LSTM transition and output projection, shared by the
//!     [`sampler`] (free-running generation) and the [`scorer`]
//!     (teacher-forced per-step loss).
//! *   [`trainer`]: gradient computation, global-norm clipping and update
//!     application for both objectives.
//! *   [`Graph`]: reverse-mode differentiation over [`funcs`] nodes, with
//!     [`CpuGraph`] as the backend.
//!
//! Rewards, rollouts, data loading, checkpoint storage and the outer training
//! schedule are left to the caller.
//!
//! ## Example
//!
//! ```no_run
//! use seqgan_generator::{Generator, GeneratorConfig, GeneratorError, Tensor};
//!
//! # fn main() -> Result<(), GeneratorError> {
//! let config = GeneratorConfig {
//!     vocab_size: 10,
//!     seq_len: 8,
//!     batch_size: 4,
//!     seed: Some(42),
//!     ..GeneratorConfig::default()
//! };
//! let mut generator = Generator::new(config)?;
//!
//! // Maximum-likelihood pretraining on real data.
//! let real = Tensor::raw(&[4, 8], (0..32).map(|i| i % 10).collect())?;
//! let nll = generator.pretrain_step(&real)?;
//! println!("pretrain loss {nll:.4}");
//!
//! // Adversarial step on the generator's own samples.
//! let fake = generator.generate()?;
//! let rewards = Tensor::constant(&[4, 8], 0.5); // from a discriminator/rollout
//! generator.adversarial_step(&fake, &rewards)?;
//! # Ok(())
//! # }
//! ```

/// LSTM state transition and output projection over a computation graph.
pub mod cell;
/// Generator configuration and its validation.
pub mod config;
/// Differentiable operations used as computation graph nodes.
pub mod funcs;
/// The public generator type, its errors and training-state snapshots.
pub mod generator;
/// The computation graph trait (`Graph`) and its CPU tape (`CpuGraph`).
pub mod graph;
/// Update rules (`Adam`) and their serializable state.
pub mod optimizer;
/// The Parameter Set record and gradient utilities.
pub mod params;
/// Autoregressive sampling.
pub mod sampler;
/// Teacher-forced per-step loss.
pub mod scorer;
/// Dense tensors and tensor errors.
pub mod tensor;
/// Gradient computation, clipping and update application.
pub mod trainer;

pub use config::{ConfigError, GeneratorConfig};
pub use generator::{Generator, GeneratorError, TrainingState};
pub use graph::{CpuGraph, Graph, GraphError, TensorId};
pub use optimizer::{Adam, Optimizer, OptimizerState};
pub use params::{GateWeights, Gradients, OutputWeights, ParameterSet};
pub use tensor::{Tensor, TensorError};
