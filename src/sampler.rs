//! Autoregressive generation.
//!
//! The sampler rolls the cell forward from the start token, drawing one token
//! per batch row at each step and feeding it back as the next input. The draw
//! is not differentiable, so parameters are registered as constants and no
//! gradient is ever requested on this path.

use crate::cell::{self, StateIds};
use crate::config::GeneratorConfig;
use crate::funcs::{log_softmax, Embedding};
use crate::generator::GeneratorError;
use crate::graph::Graph;
use crate::params::ParameterSet;
use crate::tensor::Tensor;
use rand::distributions::WeightedIndex;
use rand::prelude::*;

/// Draws one token from the categorical distribution given by a logit row.
pub fn sample_token<R: Rng>(rng: &mut R, logits: &[f32]) -> Result<usize, GeneratorError> {
    let probabilities = log_softmax(logits).into_iter().map(f32::exp);
    let dist = WeightedIndex::new(probabilities)
        .map_err(|e| GeneratorError::Sampling(format!("invalid distribution: {e}")))?;
    Ok(dist.sample(rng))
}

/// Generates `[batch_size, seq_len]` tokens with `params`.
pub fn generate<G: Graph, R: Rng>(
    graph: &mut G,
    params: &ParameterSet,
    config: &GeneratorConfig,
    rng: &mut R,
) -> Result<Tensor<usize>, GeneratorError> {
    let [batch_size, seq_len] = config.batch_shape();
    let ids = params.register(graph, false)?;

    let start = graph.alloc_usize(
        Tensor::constant(&[batch_size], config.start_token),
        "start_token".into(),
    )?;
    let mut x = graph.call(Embedding::new(), &[start, ids.embedding])?;
    let mut state: StateIds = cell::zero_state(graph, batch_size, config.hidden_dim)?;

    let mut steps: Vec<Vec<usize>> = Vec::with_capacity(seq_len);
    for i in 0..seq_len {
        state = cell::step(graph, &ids, x, state)?;
        let logits_id = cell::project(graph, ids.output_projection, state.hidden)?;
        let logits = graph.get(logits_id)?.as_float()?;

        let tokens = logits
            .blob()
            .chunks(config.vocab_size)
            .map(|row| sample_token(rng, row))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(&token) = tokens.iter().find(|&&t| t >= config.vocab_size) {
            return Err(GeneratorError::InvalidToken {
                token,
                vocab_size: config.vocab_size,
            });
        }

        if i + 1 < seq_len {
            let sampled = graph.alloc_usize(
                Tensor::raw(&[batch_size], tokens.clone())?,
                format!("sampled_{i}"),
            )?;
            x = graph.call(Embedding::new(), &[sampled, ids.embedding])?;
        }
        steps.push(tokens);
    }

    // Steps were recorded step-major; the result is one row per sequence.
    let mut blob = Vec::with_capacity(batch_size * seq_len);
    for b in 0..batch_size {
        blob.extend(steps.iter().map(|step| step[b]));
    }
    Ok(Tensor::raw(&[batch_size, seq_len], blob)?)
}
