//! Teacher-forced per-step loss.
//!
//! Step 0 reads the start token, step `i > 0` reads the ground-truth token
//! `targets[:, i - 1]`, and every step is scored against `targets[:, i]`. The
//! resulting vector is step-major: entry `i * batch_size + b` belongs to step
//! `i` of row `b`.

use crate::cell;
use crate::config::{GeneratorConfig, MAX_STEP_LOSS};
use crate::funcs::{Cat, CrossEntropy, Embedding};
use crate::generator::{check_tokens, GeneratorError};
use crate::graph::{CpuGraph, Graph, TensorId};
use crate::params::{ParameterIds, ParameterSet};
use crate::tensor::{Tensor, TensorError};

/// Adds the teacher-forced pass to `graph` and returns the id of the
/// `[seq_len * batch_size]` loss vector.
pub fn score<G: Graph>(
    graph: &mut G,
    params: &ParameterIds,
    config: &GeneratorConfig,
    targets: &Tensor<usize>,
) -> Result<TensorId, GeneratorError> {
    check_tokens(config, "targets", targets)?;
    let [batch_size, seq_len] = config.batch_shape();

    let columns = (0..seq_len)
        .map(|i| {
            let column = (0..batch_size)
                .map(|b| targets.blob()[b * seq_len + i])
                .collect();
            Ok(graph.alloc_usize(Tensor::raw(&[batch_size], column)?, format!("targets[:, {i}]"))?)
        })
        .collect::<Result<Vec<_>, GeneratorError>>()?;

    let start = graph.alloc_usize(
        Tensor::constant(&[batch_size], config.start_token),
        "start_token".into(),
    )?;
    let mut state = cell::zero_state(graph, batch_size, config.hidden_dim)?;

    let mut losses = Vec::with_capacity(seq_len);
    for i in 0..seq_len {
        let input = if i == 0 { start } else { columns[i - 1] };
        let x = graph.call(Embedding::new(), &[input, params.embedding])?;
        state = cell::step(graph, params, x, state)?;
        let logits = cell::project(graph, params.output_projection, state.hidden)?;
        losses.push(graph.call(
            CrossEntropy::clipped(0.0, MAX_STEP_LOSS),
            &[logits, columns[i]],
        )?);
    }
    Ok(graph.call(Cat::new(), &losses)?)
}

/// Per-step losses of `targets` under `params`, without gradients.
pub fn step_losses(
    params: &ParameterSet,
    config: &GeneratorConfig,
    targets: &Tensor<usize>,
) -> Result<Vec<f32>, GeneratorError> {
    let mut graph = CpuGraph::new();
    let ids = params.register(&mut graph, false)?;
    let losses = score(&mut graph, &ids, config, targets)?;
    Ok(graph.get(losses)?.as_float()?.blob().to_vec())
}

/// Flattens a `[batch_size, seq_len]` matrix into the scorer's step-major order.
pub fn step_major(matrix: &Tensor<f32>) -> Result<Tensor<f32>, TensorError> {
    let transposed = matrix.transpose()?;
    transposed.reshape(&[transposed.size()])
}
