//! LSTM state transition and output projection.
//!
//! Both are free functions over a [`Graph`] and the graph handles of a
//! registered [`ParameterSet`]; they hold no state of their own. The sampler
//! and the scorer call them identically, one `[batch_size, dim]` tensor per step.

use crate::funcs::{Add, Function, MatMul, Mul, Sigmoid, Tanh};
use crate::graph::{CpuGraph, Graph, GraphError, TensorId};
use crate::params::{GateIds, OutputIds, ParameterIds, ParameterSet};
use crate::tensor::Tensor;

/// Graph handles of a `(hidden, cell)` pair, each `[batch_size, hidden_dim]`.
#[derive(Debug, Clone, Copy)]
pub struct StateIds {
    /// Hidden vector.
    pub hidden: TensorId,
    /// Cell memory.
    pub cell: TensorId,
}

/// Host-side `(hidden, cell)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenState {
    /// `[batch_size, hidden_dim]`.
    pub hidden: Tensor<f32>,
    /// `[batch_size, hidden_dim]`.
    pub cell: Tensor<f32>,
}

impl HiddenState {
    /// All-zero state for `batch_size` rows.
    pub fn zeros(batch_size: usize, hidden_dim: usize) -> Self {
        Self {
            hidden: Tensor::zeros(&[batch_size, hidden_dim]),
            cell: Tensor::zeros(&[batch_size, hidden_dim]),
        }
    }
}

/// Allocates an all-zero state as graph constants.
pub fn zero_state<G: Graph>(
    graph: &mut G,
    batch_size: usize,
    hidden_dim: usize,
) -> Result<StateIds, GraphError> {
    let state = HiddenState::zeros(batch_size, hidden_dim);
    Ok(StateIds {
        hidden: graph.alloc(state.hidden, false, "h0".into())?,
        cell: graph.alloc(state.cell, false, "c0".into())?,
    })
}

/// `act(x·W + h·U + b)`
fn gate<G: Graph>(
    graph: &mut G,
    weights: GateIds,
    x: TensorId,
    h: TensorId,
    activation: Box<dyn Function>,
) -> Result<TensorId, GraphError> {
    let xw = graph.call(MatMul::new(), &[x, weights.w])?;
    let hu = graph.call(MatMul::new(), &[h, weights.u])?;
    let sum = graph.call(Add::new(), &[xw, hu])?;
    let pre = graph.call(Add::new(), &[sum, weights.b])?;
    graph.call(activation, &[pre])
}

/// One LSTM transition.
///
/// ```text
/// i  = sigmoid(x·Wi + h·Ui + bi)
/// f  = sigmoid(x·Wf + h·Uf + bf)
/// o  = sigmoid(x·Wo + h·Uo + bo)
/// c~ = tanh(x·Wc + h·Uc + bc)
/// c' = f*c + i*c~
/// h' = o*tanh(c')
/// ```
pub fn step<G: Graph>(
    graph: &mut G,
    params: &ParameterIds,
    x: TensorId,
    prev: StateIds,
) -> Result<StateIds, GraphError> {
    let i = gate(graph, params.input_gate, x, prev.hidden, Sigmoid::new())?;
    let f = gate(graph, params.forget_gate, x, prev.hidden, Sigmoid::new())?;
    let o = gate(graph, params.output_gate, x, prev.hidden, Sigmoid::new())?;
    let candidate = gate(graph, params.candidate_gate, x, prev.hidden, Tanh::new())?;

    let kept = graph.call(Mul::new(), &[f, prev.cell])?;
    let written = graph.call(Mul::new(), &[i, candidate])?;
    let cell = graph.call(Add::new(), &[kept, written])?;

    let squashed = graph.call(Tanh::new(), &[cell])?;
    let hidden = graph.call(Mul::new(), &[o, squashed])?;
    Ok(StateIds { hidden, cell })
}

/// Logits `hidden·Wo + bo`, `[batch_size, vocab_size]`. No activation.
pub fn project<G: Graph>(
    graph: &mut G,
    weights: OutputIds,
    hidden: TensorId,
) -> Result<TensorId, GraphError> {
    let hw = graph.call(MatMul::new(), &[hidden, weights.w])?;
    graph.call(Add::new(), &[hw, weights.b])
}

/// Evaluates a single transition outside any training pass.
pub fn step_once(
    params: &ParameterSet,
    x: &Tensor<f32>,
    prev: &HiddenState,
) -> Result<HiddenState, GraphError> {
    let mut graph = CpuGraph::new();
    let ids = params.register(&mut graph, false)?;
    let x = graph.alloc(x.clone(), false, "x".into())?;
    let prev = StateIds {
        hidden: graph.alloc(prev.hidden.clone(), false, "h".into())?,
        cell: graph.alloc(prev.cell.clone(), false, "c".into())?,
    };
    let next = step(&mut graph, &ids, x, prev)?;
    Ok(HiddenState {
        hidden: graph.get(next.hidden)?.as_float()?.clone(),
        cell: graph.get(next.cell)?.as_float()?.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::funcs::sigmoid_scalar;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            vocab_size: 6,
            emb_dim: 3,
            hidden_dim: 2,
            batch_size: 2,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_zero_weights_keep_zero_state() {
        let params = ParameterSet::zeros(&config());
        let x = Tensor::constant(&[2, 3], 0.7);
        let next = step_once(&params, &x, &HiddenState::zeros(2, 2)).unwrap();
        assert_eq!(next, HiddenState::zeros(2, 2));
    }

    #[test]
    fn test_step_matches_hand_computation() {
        // Only biases set: every gate sees a constant pre-activation.
        let mut params = ParameterSet::zeros(&config());
        params.input_gate.b = Tensor::constant(&[2], 1.0);
        params.forget_gate.b = Tensor::constant(&[2], -1.0);
        params.output_gate.b = Tensor::constant(&[2], 2.0);
        params.candidate_gate.b = Tensor::constant(&[2], 0.5);

        let prev = HiddenState {
            hidden: Tensor::zeros(&[2, 2]),
            cell: Tensor::raw(&[2, 2], vec![1.0, -1.0, 0.0, 2.0]).unwrap(),
        };
        let next = step_once(&params, &Tensor::zeros(&[2, 3]), &prev).unwrap();

        let (i, f, o, c) = (
            sigmoid_scalar(1.0),
            sigmoid_scalar(-1.0),
            sigmoid_scalar(2.0),
            0.5f32.tanh(),
        );
        for (k, &prev_c) in prev.cell.blob().iter().enumerate() {
            let cell = f * prev_c + i * c;
            assert_abs_diff_eq!(next.cell.blob()[k], cell, epsilon = 1e-6);
            assert_abs_diff_eq!(next.hidden.blob()[k], o * cell.tanh(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rows_are_independent() {
        let c = config();
        let params = ParameterSet::random(&mut StdRng::seed_from_u64(3), &c).unwrap();
        let x = Tensor::raw(&[2, 3], vec![0.1, 0.2, 0.3, -0.5, 0.4, 0.9]).unwrap();
        let both = step_once(&params, &x, &HiddenState::zeros(2, 2)).unwrap();

        let row = Tensor::raw(&[1, 3], vec![-0.5, 0.4, 0.9]).unwrap();
        let single = step_once(&params, &row, &HiddenState::zeros(1, 2)).unwrap();
        assert_eq!(both.hidden.get(1).unwrap().blob(), single.hidden.blob());
        assert_eq!(both.cell.get(1).unwrap().blob(), single.cell.blob());
    }

    #[test]
    fn test_project_is_affine() {
        let c = config();
        let mut params = ParameterSet::zeros(&c);
        params.output_projection.w = Tensor::raw(
            &[2, 6],
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
        )
        .unwrap();
        params.output_projection.b = Tensor::constant(&[6], 0.5);

        let mut graph = CpuGraph::new();
        let ids = params.register(&mut graph, false).unwrap();
        let h = graph
            .alloc(Tensor::raw(&[1, 2], vec![3.0, 4.0]).unwrap(), false, "h".into())
            .unwrap();
        let logits = project(&mut graph, ids.output_projection, h).unwrap();
        assert_eq!(
            graph.get(logits).unwrap().as_float().unwrap().blob(),
            &[3.5, 4.5, 0.5, 0.5, 0.5, 2.5]
        );
    }
}
