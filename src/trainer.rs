//! Gradient computation and update application for both training objectives.
//!
//! A step reads the Parameter Set once to build a fresh graph, differentiates
//! the objective, clips the gradient to the configured global norm and only
//! then hands it to the optimizer, so parameters are updated all at once or
//! not at all.

use crate::config::GeneratorConfig;
use crate::funcs::{Coeff, Mul, Sum};
use crate::generator::{check_rewards, GeneratorError};
use crate::graph::{CpuGraph, Graph};
use crate::optimizer::{Optimizer, OptimizerState};
use crate::params::{Gradients, ParameterSet};
use crate::scorer;
use crate::tensor::Tensor;
use tracing::debug;

/// What the scorer's loss vector is reduced to.
#[derive(Debug, Clone, Copy)]
pub enum Objective<'a> {
    /// Mean per-step loss (maximum likelihood).
    Pretrain,
    /// Per-step loss weighted by a `[batch_size, seq_len]` reward matrix, summed.
    Adversarial {
        /// Rewards, one per (row, step).
        rewards: &'a Tensor<f32>,
    },
}

/// Outcome of differentiating an objective.
#[derive(Debug, Clone)]
pub struct GradientReport {
    /// Objective value before the update.
    pub loss: f32,
    /// Clipped gradients.
    pub gradients: Gradients,
    /// Global norm before clipping.
    pub norm: f32,
}

/// Differentiates `objective` on `targets` and clips the result.
///
/// Fails with [`GeneratorError::NonFiniteGradient`] when the clipped gradient
/// holds a NaN or infinity.
pub fn compute_gradients(
    params: &ParameterSet,
    config: &GeneratorConfig,
    targets: &Tensor<usize>,
    objective: Objective<'_>,
) -> Result<GradientReport, GeneratorError> {
    if let Objective::Adversarial { rewards } = objective {
        check_rewards(config, rewards)?;
    }

    let mut graph = CpuGraph::new();
    let ids = params.register(&mut graph, true)?;
    let losses = scorer::score(&mut graph, &ids, config, targets)?;

    let root = match objective {
        Objective::Pretrain => {
            let total = graph.call(Sum::new(), &[losses])?;
            let count = (config.batch_size * config.seq_len) as f32;
            graph.call(Coeff::new(count.recip()), &[total])?
        }
        Objective::Adversarial { rewards } => {
            let rewards = graph.alloc(scorer::step_major(rewards)?, false, "rewards".into())?;
            let weighted = graph.call(Mul::new(), &[losses, rewards])?;
            graph.call(Sum::new(), &[weighted])?
        }
    };

    let loss = graph.backward(root)?;
    let mut gradients = ids.gradients(&graph)?;
    let norm = gradients.clip_by_global_norm(config.gradient_clip_norm);
    if let Some(parameter) = gradients.first_non_finite() {
        return Err(GeneratorError::NonFiniteGradient { parameter });
    }
    if !norm.is_finite() {
        return Err(GeneratorError::NonFiniteGradient {
            parameter: "global_norm",
        });
    }
    if norm > config.gradient_clip_norm {
        debug!(norm, clip = config.gradient_clip_norm, "gradient clipped");
    }

    Ok(GradientReport {
        loss,
        gradients,
        norm,
    })
}

/// Clipped gradients of the mean per-step loss.
pub fn pretrain_gradients(
    params: &ParameterSet,
    config: &GeneratorConfig,
    targets: &Tensor<usize>,
) -> Result<GradientReport, GeneratorError> {
    compute_gradients(params, config, targets, Objective::Pretrain)
}

/// Clipped gradients of the reward-weighted loss sum.
pub fn adversarial_gradients(
    params: &ParameterSet,
    config: &GeneratorConfig,
    targets: &Tensor<usize>,
    rewards: &Tensor<f32>,
) -> Result<GradientReport, GeneratorError> {
    compute_gradients(params, config, targets, Objective::Adversarial { rewards })
}

/// Applies a computed gradient with `optimizer`.
pub fn apply<O: Optimizer>(
    optimizer: &O,
    params: &mut ParameterSet,
    report: &GradientReport,
    state: &mut OptimizerState,
    learning_rate: f32,
) -> Result<(), GeneratorError> {
    optimizer.step(params, &report.gradients, state, learning_rate)?;
    debug!(
        loss = report.loss,
        norm = report.norm,
        learning_rate,
        step = state.step,
        "parameters updated"
    );
    Ok(())
}
