use crate::params::{Gradients, ParameterSet};
use crate::tensor::{Tensor, TensorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Represents the persistent state of an optimizer across training steps.
///
/// Includes the current step count and any optimizer-specific tensors
/// (like momentum and variance for Adam).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OptimizerState {
    /// The number of optimization steps taken so far.
    pub step: usize,
    /// Optimizer-specific state tensors, keyed by parameter name plus a suffix.
    pub state: HashMap<String, Tensor<f32>>,
}

/// Trait for update rules applied to the Parameter Set.
///
/// Optimizers are stateless values; the per-run state lives in an
/// [`OptimizerState`] owned by the caller, so one rule can drive several
/// independent states.
pub trait Optimizer: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + fmt::Debug {
    /// Applies one update of `params` along `grads`.
    ///
    /// Either every tensor is updated or, on error, none is.
    fn step(
        &self,
        params: &mut ParameterSet,
        grads: &Gradients,
        optimizer_state: &mut OptimizerState,
        learning_rate: f32,
    ) -> Result<(), TensorError>;
}

// Default epsilon value for numerical stability.
const DEFAULT_EPSILON: f32 = 1e-8;

/// Adam, with optional decoupled weight decay (AdamW when `weight_decay > 0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    /// Decay of the first moment estimate.
    pub beta1: f32,
    /// Decay of the second moment estimate.
    pub beta2: f32,
    /// Decoupled weight decay; `0.0` is plain Adam.
    pub weight_decay: f32,
    /// Denominator offset.
    pub epsilon: f32,
}

impl Adam {
    /// Creates an optimizer with explicit hyperparameters.
    pub const fn new(beta1: f32, beta2: f32, weight_decay: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            weight_decay,
            epsilon,
        }
    }
}

impl Default for Adam {
    /// `beta1 = 0.9`, `beta2 = 0.999`, no weight decay, `epsilon = 1e-8`.
    fn default() -> Self {
        Self::new(0.9, 0.999, 0.0, DEFAULT_EPSILON)
    }
}

struct Slot<'a> {
    name: &'static str,
    param: &'a mut Tensor<f32>,
    grad: &'a Tensor<f32>,
    m: Tensor<f32>,
    v: Tensor<f32>,
}

impl Optimizer for Adam {
    fn step(
        &self,
        params: &mut ParameterSet,
        grads: &Gradients,
        optimizer_state: &mut OptimizerState,
        learning_rate: f32,
    ) -> Result<(), TensorError> {
        // Validate everything up front so a failure leaves no tensor half-updated.
        for ((_, param), (_, grad)) in params.tensors().iter().zip(grads.tensors()) {
            grad.expect_shape(param.shape())?;
        }
        for (name, param) in params.tensors() {
            for key in [format!("{name}_m"), format!("{name}_v")] {
                if let Some(moment) = optimizer_state.state.get(&key) {
                    moment.expect_shape(param.shape())?;
                }
            }
        }

        let current_step = optimizer_state.step + 1; // 1-based for bias correction
        let exponent = i32::try_from(current_step).unwrap_or(i32::MAX);
        let bias_correction1 = 1.0 - self.beta1.powi(exponent);
        let bias_correction2 = 1.0 - self.beta2.powi(exponent);

        // Moments are taken out of the map so the parallel section owns them.
        let mut slots: Vec<Slot<'_>> = params
            .tensors_mut()
            .into_iter()
            .zip(grads.tensors())
            .map(|((name, param), (_, grad))| {
                let mut take = |suffix: &str| {
                    optimizer_state
                        .state
                        .remove(&format!("{name}_{suffix}"))
                        .unwrap_or_else(|| Tensor::zeros(param.shape()))
                };
                let m = take("m");
                let v = take("v");
                Slot {
                    name,
                    param,
                    grad,
                    m,
                    v,
                }
            })
            .collect();

        slots.par_iter_mut().for_each(|slot| {
            let values = slot
                .param
                .blob_mut()
                .iter_mut()
                .zip(slot.grad.blob())
                .zip(slot.m.blob_mut().iter_mut().zip(slot.v.blob_mut()));
            for ((p, &g), (m, v)) in values {
                *p -= *p * learning_rate * self.weight_decay;
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / bias_correction1;
                let v_hat = *v / bias_correction2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        });

        for slot in slots {
            optimizer_state
                .state
                .insert(format!("{}_m", slot.name), slot.m);
            optimizer_state
                .state
                .insert(format!("{}_v", slot.name), slot.v);
        }
        optimizer_state.step = current_step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use approx::assert_abs_diff_eq;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            vocab_size: 3,
            emb_dim: 2,
            hidden_dim: 2,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let c = config();
        let mut params = ParameterSet::zeros(&c);
        let mut grads = params.zeros_like();
        grads.embedding.blob_mut()[0] = 0.3;
        grads.output_projection.b.blob_mut()[2] = -2.0;
        let mut state = OptimizerState::default();

        Adam::default().step(&mut params, &grads, &mut state, 0.01).unwrap();

        // With bias correction, Adam's first step is lr * sign(g).
        assert_abs_diff_eq!(params.embedding.blob()[0], -0.01, epsilon = 1e-5);
        assert_abs_diff_eq!(params.output_projection.b.blob()[2], 0.01, epsilon = 1e-5);
        assert_eq!(params.embedding.blob()[1], 0.0);
        assert_eq!(state.step, 1);
        assert_eq!(state.state.len(), 2 * crate::params::NUM_TENSORS);
    }

    #[test]
    fn test_shape_error_leaves_state_untouched() {
        let c = config();
        let mut params = ParameterSet::zeros(&c);
        let grads = params.zeros_like();
        let mut state = OptimizerState::default();
        state
            .state
            .insert("embedding_m".to_string(), Tensor::zeros(&[1]));
        let before = (params.clone(), state.clone());

        assert!(Adam::default()
            .step(&mut params, &grads, &mut state, 0.01)
            .is_err());
        assert_eq!((params, state), before);
    }
}
