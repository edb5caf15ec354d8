use crate::funcs::Function;
use crate::tensor::{GeneralTensor, Tensor, TensorError};
use thiserror::Error;

/// Handle to a tensor stored in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

/// Errors raised while building or differentiating a graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A function node failed.
    #[error(transparent)]
    Tensor(#[from] TensorError),
    /// The id does not belong to this graph.
    #[error("tensor {0:?} not found in graph")]
    TensorNotFound(TensorId),
    /// A gradient was requested before `backward` reached the tensor.
    #[error("no gradient for tensor '{0}', run backward first")]
    NotBackpropagated(String),
    /// `backward` needs a scalar root.
    #[error("backward root must be a scalar, got shape {0:?}")]
    NonScalarRoot(Vec<usize>),
}

/// A computation graph that records operations for reverse-mode differentiation.
///
/// Operations are evaluated eagerly when they are added with [`Graph::call`],
/// so a graph is built on demand for one forward pass and dropped afterwards.
pub trait Graph {
    /// Stores a float tensor. Parameters (`is_param`) are the leaves gradients
    /// are reported for.
    fn alloc(
        &mut self,
        tensor: Tensor<f32>,
        is_param: bool,
        name: String,
    ) -> Result<TensorId, GraphError>;

    /// Stores an index tensor (token ids). Index tensors never carry gradients.
    fn alloc_usize(&mut self, tensor: Tensor<usize>, name: String)
        -> Result<TensorId, GraphError>;

    /// Applies `f` to `inps`, returning the id of the result.
    fn call(&mut self, f: Box<dyn Function>, inps: &[TensorId]) -> Result<TensorId, GraphError>;

    /// Value of a tensor.
    fn get(&self, id: TensorId) -> Result<&GeneralTensor, GraphError>;

    /// Gradient of the last `backward` root with respect to a tensor.
    fn get_grad(&self, id: TensorId) -> Result<&Tensor<f32>, GraphError>;

    /// Name given at allocation (or derived from the function for call results).
    fn name_of(&self, id: TensorId) -> Result<&str, GraphError>;

    /// Ids of all parameters, in allocation order.
    fn params(&self) -> &[TensorId];

    /// Clears every stored gradient.
    fn zero_grad(&mut self);

    /// Back-propagates from the scalar `root`, returning its value.
    fn backward(&mut self, root: TensorId) -> Result<f32, GraphError>;
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    value: GeneralTensor,
    grad: Option<Tensor<f32>>,
    requires_grad: bool,
    op: Option<(Box<dyn Function>, Vec<TensorId>)>,
}

/// Single-threaded CPU tape.
///
/// Nodes are appended in evaluation order, which is a topological order, so
/// `backward` is a single reverse sweep.
#[derive(Debug, Clone, Default)]
pub struct CpuGraph {
    nodes: Vec<Node>,
    params: Vec<TensorId>,
}

impl CpuGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, id: TensorId) -> Result<&Node, GraphError> {
        self.nodes.get(id.0).ok_or(GraphError::TensorNotFound(id))
    }

    fn push(&mut self, node: Node) -> TensorId {
        self.nodes.push(node);
        TensorId(self.nodes.len() - 1)
    }

    fn accumulate(&mut self, id: TensorId, grad: Tensor<f32>) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or(GraphError::TensorNotFound(id))?;
        if !node.requires_grad {
            return Ok(());
        }
        node.grad = Some(match node.grad.take() {
            Some(existing) => (&existing + &grad)?,
            None => grad,
        });
        Ok(())
    }
}

impl Graph for CpuGraph {
    fn alloc(
        &mut self,
        tensor: Tensor<f32>,
        is_param: bool,
        name: String,
    ) -> Result<TensorId, GraphError> {
        let id = self.push(Node {
            name,
            value: GeneralTensor::Float(tensor),
            grad: None,
            requires_grad: is_param,
            op: None,
        });
        if is_param {
            self.params.push(id);
        }
        Ok(id)
    }

    fn alloc_usize(
        &mut self,
        tensor: Tensor<usize>,
        name: String,
    ) -> Result<TensorId, GraphError> {
        Ok(self.push(Node {
            name,
            value: GeneralTensor::Usize(tensor),
            grad: None,
            requires_grad: false,
            op: None,
        }))
    }

    fn call(
        &mut self,
        mut f: Box<dyn Function>,
        inps: &[TensorId],
    ) -> Result<TensorId, GraphError> {
        let mut requires_grad = false;
        let mut values = Vec::with_capacity(inps.len());
        for &id in inps {
            let node = self.node(id)?;
            requires_grad |= node.requires_grad;
            values.push(&node.value);
        }
        let out = f.run(&values)?;
        let name = format!("{f:?}#{}", self.nodes.len());
        Ok(self.push(Node {
            name,
            value: GeneralTensor::Float(out),
            grad: None,
            requires_grad,
            op: Some((f, inps.to_vec())),
        }))
    }

    fn get(&self, id: TensorId) -> Result<&GeneralTensor, GraphError> {
        Ok(&self.node(id)?.value)
    }

    fn get_grad(&self, id: TensorId) -> Result<&Tensor<f32>, GraphError> {
        let node = self.node(id)?;
        node.grad
            .as_ref()
            .ok_or_else(|| GraphError::NotBackpropagated(node.name.clone()))
    }

    fn name_of(&self, id: TensorId) -> Result<&str, GraphError> {
        Ok(&self.node(id)?.name)
    }

    fn params(&self) -> &[TensorId] {
        &self.params
    }

    fn zero_grad(&mut self) {
        for node in &mut self.nodes {
            node.grad = None;
        }
    }

    fn backward(&mut self, root: TensorId) -> Result<f32, GraphError> {
        self.zero_grad();
        let value = self.node(root)?.value.as_float()?;
        if value.size() != 1 {
            return Err(GraphError::NonScalarRoot(value.shape().to_vec()));
        }
        let loss = value.blob()[0];
        let seed = Tensor::constant(value.shape(), 1.0);
        if let Some(node) = self.nodes.get_mut(root.0) {
            node.grad = Some(seed);
        }

        for index in (0..=root.0).rev() {
            let node = &self.nodes[index];
            let (Some(out_grad), Some((f, inps)), true) = (&node.grad, &node.op, node.requires_grad)
            else {
                continue;
            };
            let inp_grads = {
                let values = inps
                    .iter()
                    .map(|&id| self.node(id).map(|n| &n.value))
                    .collect::<Result<Vec<_>, _>>()?;
                f.grad(&values, out_grad)?
            };
            let inps = inps.clone();
            for (id, grad) in inps.into_iter().zip(inp_grads) {
                if matches!(self.node(id)?.value, GeneralTensor::Float(_)) {
                    self.accumulate(id, grad)?;
                }
            }
        }

        // Parameters the root does not depend on get an explicit zero gradient.
        for &id in &self.params {
            let node = &mut self.nodes[id.0];
            if node.grad.is_none() {
                node.grad = Some(Tensor::zeros(node.value.shape()));
            }
        }
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::{Add, Mul, Sum};

    #[test]
    fn test_backward_through_shared_node() {
        // loss = sum(x * x + x)
        let mut g = CpuGraph::new();
        let x = g
            .alloc(Tensor::raw(&[2], vec![1.0, 3.0]).unwrap(), true, "x".into())
            .unwrap();
        let sq = g.call(Mul::new(), &[x, x]).unwrap();
        let y = g.call(Add::new(), &[sq, x]).unwrap();
        let loss = g.call(Sum::new(), &[y]).unwrap();

        let value = g.backward(loss).unwrap();
        assert!((value - 14.0).abs() < 1e-6);
        assert_eq!(g.get_grad(x).unwrap().blob(), &[3.0, 7.0]);
    }

    #[test]
    fn test_unused_param_gets_zero_grad() {
        let mut g = CpuGraph::new();
        let x = g.alloc(Tensor::constant(&[2], 1.0), true, "x".into()).unwrap();
        let unused = g.alloc(Tensor::constant(&[3], 1.0), true, "unused".into()).unwrap();
        let loss = g.call(Sum::new(), &[x]).unwrap();
        g.backward(loss).unwrap();
        assert_eq!(g.get_grad(unused).unwrap().blob(), &[0.0, 0.0, 0.0]);
        assert_eq!(g.params(), &[x, unused]);
    }

    #[test]
    fn test_constants_do_not_collect_gradients() {
        let mut g = CpuGraph::new();
        let c = g.alloc(Tensor::constant(&[2], 2.0), false, "c".into()).unwrap();
        let x = g.alloc(Tensor::constant(&[2], 1.0), true, "x".into()).unwrap();
        let y = g.call(Mul::new(), &[x, c]).unwrap();
        let loss = g.call(Sum::new(), &[y]).unwrap();
        g.backward(loss).unwrap();
        assert!(matches!(
            g.get_grad(c),
            Err(GraphError::NotBackpropagated(_))
        ));
        assert_eq!(g.get_grad(x).unwrap().blob(), &[2.0, 2.0]);
    }

    #[test]
    fn test_backward_rejects_non_scalar_root() {
        let mut g = CpuGraph::new();
        let x = g.alloc(Tensor::constant(&[2], 1.0), true, "x".into()).unwrap();
        assert!(matches!(g.backward(x), Err(GraphError::NonScalarRoot(_))));
    }
}
