use crate::config::{ConfigError, GeneratorConfig};
use crate::graph::{CpuGraph, GraphError};
use crate::optimizer::{Adam, Optimizer, OptimizerState};
use crate::params::ParameterSet;
use crate::tensor::{Tensor, TensorError};
use crate::{sampler, scorer, trainer};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by the generator's public operations.
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// A token or reward batch does not have shape `[batch_size, seq_len]`,
    /// or restored parameters do not fit the configuration.
    #[error("{what} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Which input was rejected.
        what: &'static str,
        /// Configured shape.
        expected: Vec<usize>,
        /// Supplied shape.
        got: Vec<usize>,
    },
    /// A supplied or sampled token id is not in `[0, vocab_size)`.
    #[error("token {token} is outside the vocabulary of size {vocab_size}")]
    InvalidToken {
        /// Offending token id.
        token: usize,
        /// Configured vocabulary size.
        vocab_size: usize,
    },
    /// The clipped gradient contains NaN or infinity; no parameter was changed.
    #[error("non-finite gradient in {parameter}")]
    NonFiniteGradient {
        /// First affected tensor, or `global_norm` when only the norm overflowed.
        parameter: &'static str,
    },
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Graph construction or differentiation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Tensor arithmetic failed.
    #[error(transparent)]
    Tensor(#[from] TensorError),
    /// The logits did not form a valid categorical distribution.
    #[error("sampling failed: {0}")]
    Sampling(String),
    /// A training state could not be encoded or decoded.
    #[error("training state codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// Fails unless `shape` is the configured `[batch_size, seq_len]`.
pub(crate) fn check_batch_shape(
    config: &GeneratorConfig,
    what: &'static str,
    shape: &[usize],
) -> Result<(), GeneratorError> {
    let expected = config.batch_shape();
    if shape == expected {
        Ok(())
    } else {
        Err(GeneratorError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            got: shape.to_vec(),
        })
    }
}

/// Checks shape and token range of a token batch.
pub(crate) fn check_tokens(
    config: &GeneratorConfig,
    what: &'static str,
    tokens: &Tensor<usize>,
) -> Result<(), GeneratorError> {
    check_batch_shape(config, what, tokens.shape())?;
    match tokens.blob().iter().find(|&&t| t >= config.vocab_size) {
        Some(&token) => Err(GeneratorError::InvalidToken {
            token,
            vocab_size: config.vocab_size,
        }),
        None => Ok(()),
    }
}

/// Checks the shape of a reward matrix.
pub(crate) fn check_rewards(
    config: &GeneratorConfig,
    rewards: &Tensor<f32>,
) -> Result<(), GeneratorError> {
    check_batch_shape(config, "rewards", rewards.shape())
}

/// Snapshot of everything that outlives a single call: parameters and the
/// state of both optimizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// The Parameter Set.
    pub params: ParameterSet,
    /// Moments and step count of the pretrain optimizer.
    pub pretrain_optimizer: OptimizerState,
    /// Moments and step count of the adversarial optimizer.
    pub adversarial_optimizer: OptimizerState,
}

impl TrainingState {
    /// Encodes the snapshot with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GeneratorError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a snapshot produced by [`TrainingState::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GeneratorError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// LSTM sequence generator.
///
/// Owns the Parameter Set, the two optimizer states and the sampling RNG.
/// Updates take `&mut self`, so a generator shared between workers (for
/// example behind a `Mutex`) applies them one at a time and readers never
/// observe a partially updated Parameter Set.
#[derive(Debug)]
pub struct Generator<O: Optimizer = Adam> {
    config: GeneratorConfig,
    params: ParameterSet,
    optimizer: O,
    pretrain_state: OptimizerState,
    adversarial_state: OptimizerState,
    rng: StdRng,
}

impl Generator<Adam> {
    /// Builds a generator with randomly initialized parameters and Adam.
    pub fn new(config: GeneratorConfig) -> Result<Self, GeneratorError> {
        Self::with_optimizer(config, Adam::default())
    }

    /// Builds a generator around existing parameters, using Adam.
    pub fn with_parameters(
        config: GeneratorConfig,
        params: ParameterSet,
    ) -> Result<Self, GeneratorError> {
        Self::from_parts(config, params, Adam::default())
    }
}

impl<O: Optimizer> Generator<O> {
    /// Builds a generator with randomly initialized parameters.
    pub fn with_optimizer(config: GeneratorConfig, optimizer: O) -> Result<Self, GeneratorError> {
        config.validate()?;
        let mut rng = Self::make_rng(&config);
        let params = ParameterSet::random(&mut rng, &config)?;
        debug!(
            num_params = params.num_params(),
            vocab_size = config.vocab_size,
            hidden_dim = config.hidden_dim,
            "generator initialized"
        );
        Ok(Self {
            config,
            params,
            optimizer,
            pretrain_state: OptimizerState::default(),
            adversarial_state: OptimizerState::default(),
            rng,
        })
    }

    /// Builds a generator around existing parameters.
    pub fn from_parts(
        config: GeneratorConfig,
        params: ParameterSet,
        optimizer: O,
    ) -> Result<Self, GeneratorError> {
        config.validate()?;
        check_param_shapes(&params, &config)?;
        let rng = Self::make_rng(&config);
        Ok(Self {
            config,
            params,
            optimizer,
            pretrain_state: OptimizerState::default(),
            adversarial_state: OptimizerState::default(),
            rng,
        })
    }

    fn make_rng(config: &GeneratorConfig) -> StdRng {
        config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }

    /// The configuration the generator was built with.
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// The current Parameter Set.
    pub const fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.params.num_params()
    }

    /// Restarts the sampling RNG from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Samples `[batch_size, seq_len]` tokens. No gradient is computed.
    pub fn generate(&mut self) -> Result<Tensor<usize>, GeneratorError> {
        let tokens = sampler::generate(
            &mut CpuGraph::new(),
            &self.params,
            &self.config,
            &mut self.rng,
        )?;
        debug!(
            batch_size = self.config.batch_size,
            seq_len = self.config.seq_len,
            "generated batch"
        );
        Ok(tokens)
    }

    /// Teacher-forced per-step losses of `targets`, step-major, without training.
    pub fn losses(&self, targets: &Tensor<usize>) -> Result<Vec<f32>, GeneratorError> {
        scorer::step_losses(&self.params, &self.config, targets)
    }

    /// One maximum-likelihood update on `targets`; returns the mean per-step loss
    /// measured before the update.
    pub fn pretrain_step(&mut self, targets: &Tensor<usize>) -> Result<f32, GeneratorError> {
        let report = trainer::pretrain_gradients(&self.params, &self.config, targets)?;
        trainer::apply(
            &self.optimizer,
            &mut self.params,
            &report,
            &mut self.pretrain_state,
            self.config.pretrain_learning_rate,
        )?;
        Ok(report.loss)
    }

    /// One reward-weighted update; returns `sum(loss ⊙ rewards)` measured before
    /// the update. `rewards[b][i]` weighs step `i` of row `b`.
    pub fn adversarial_step(
        &mut self,
        targets: &Tensor<usize>,
        rewards: &Tensor<f32>,
    ) -> Result<f32, GeneratorError> {
        let report =
            trainer::adversarial_gradients(&self.params, &self.config, targets, rewards)?;
        trainer::apply(
            &self.optimizer,
            &mut self.params,
            &report,
            &mut self.adversarial_state,
            self.config.adversarial_learning_rate,
        )?;
        Ok(report.loss)
    }

    /// Snapshot of parameters and optimizer states.
    pub fn training_state(&self) -> TrainingState {
        TrainingState {
            params: self.params.clone(),
            pretrain_optimizer: self.pretrain_state.clone(),
            adversarial_optimizer: self.adversarial_state.clone(),
        }
    }

    /// Restores a snapshot. With `load_optimizer` unset only the parameters are
    /// taken and both optimizers restart from scratch.
    pub fn set_training_state(
        &mut self,
        state: TrainingState,
        load_optimizer: bool,
    ) -> Result<(), GeneratorError> {
        check_param_shapes(&state.params, &self.config)?;
        if load_optimizer {
            for (label, opt) in [
                ("pretrain", &state.pretrain_optimizer),
                ("adversarial", &state.adversarial_optimizer),
            ] {
                warn_missing_moments(label, opt, &state.params);
            }
            self.pretrain_state = state.pretrain_optimizer;
            self.adversarial_state = state.adversarial_optimizer;
        } else {
            self.pretrain_state = OptimizerState::default();
            self.adversarial_state = OptimizerState::default();
        }
        self.params = state.params;
        Ok(())
    }
}

fn check_param_shapes(
    params: &ParameterSet,
    config: &GeneratorConfig,
) -> Result<(), GeneratorError> {
    params
        .check_shapes(config)
        .map_err(|e| match e {
            TensorError::ShapeMismatch { expected, got } => GeneratorError::ShapeMismatch {
                what: "parameters",
                expected,
                got,
            },
            other => other.into(),
        })
}

fn warn_missing_moments(label: &str, state: &OptimizerState, params: &ParameterSet) {
    if state.step == 0 {
        return;
    }
    for (name, _) in params.tensors() {
        if !state.state.contains_key(&format!("{name}_m")) {
            warn!(optimizer = label, parameter = name, "optimizer state has no moments");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            vocab_size: 6,
            emb_dim: 4,
            hidden_dim: 5,
            seq_len: 4,
            batch_size: 3,
            seed: Some(17),
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let c = GeneratorConfig {
            seq_len: 0,
            ..config()
        };
        assert!(matches!(
            Generator::new(c),
            Err(GeneratorError::Config(ConfigError::ZeroDimension("seq_len")))
        ));
    }

    #[test]
    fn test_seed_fixes_initialization() {
        let a = Generator::new(config()).unwrap();
        let b = Generator::new(config()).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_wrong_parameter_shapes_are_rejected() {
        let other = GeneratorConfig {
            hidden_dim: 2,
            ..config()
        };
        assert!(matches!(
            Generator::with_parameters(config(), ParameterSet::zeros(&other)),
            Err(GeneratorError::ShapeMismatch { what: "parameters", .. })
        ));
    }

    #[test]
    fn test_training_state_restore() {
        let mut g = Generator::new(config()).unwrap();
        let targets = Tensor::raw(&[3, 4], vec![1, 2, 3, 4, 5, 0, 1, 2, 3, 4, 5, 0]).unwrap();
        g.pretrain_step(&targets).unwrap();
        let snapshot = g.training_state();
        let bytes = snapshot.to_bytes().unwrap();

        g.pretrain_step(&targets).unwrap();
        assert_ne!(g.params(), &snapshot.params);

        g.set_training_state(TrainingState::from_bytes(&bytes).unwrap(), true)
            .unwrap();
        assert_eq!(g.training_state(), snapshot);

        g.set_training_state(snapshot.clone(), false).unwrap();
        assert_eq!(g.training_state().pretrain_optimizer.step, 0);
        assert_eq!(g.params(), &snapshot.params);
    }

    /// Counts events that carry a `loss` field.
    struct LossEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for LossEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().fields().field("loss").is_some() {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_each_update_logs_its_loss_once() {
        let mut g = Generator::new(config()).unwrap();
        let targets = Tensor::raw(&[3, 4], vec![1; 12]).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LossEvents(Arc::clone(&count)));
        tracing::subscriber::with_default(subscriber, || {
            g.pretrain_step(&targets).unwrap();
            g.adversarial_step(&targets, &Tensor::constant(&[3, 4], 0.5))
                .unwrap();
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_optimizer_states_are_independent() {
        let mut g = Generator::new(config()).unwrap();
        let targets = Tensor::raw(&[3, 4], vec![1; 12]).unwrap();
        g.pretrain_step(&targets).unwrap();
        g.pretrain_step(&targets).unwrap();
        g.adversarial_step(&targets, &Tensor::constant(&[3, 4], 0.5))
            .unwrap();
        let state = g.training_state();
        assert_eq!(state.pretrain_optimizer.step, 2);
        assert_eq!(state.adversarial_optimizer.step, 1);
    }
}
