//! Differentiable operations used as nodes of a computation graph.
//!
//! Each [`Function`] computes its output from the values of its inputs and,
//! given the gradient flowing into its output, the gradient with respect to
//! every input. Index inputs (token ids) receive an empty gradient that the
//! graph discards.

use crate::tensor::{GeneralTensor, Tensor, TensorError};

mod add;
mod cat;
mod coeff;
mod cross_entropy;
mod embedding;
mod matmul;
mod mul;
mod sigmoid;
mod sum;
mod tanh;

pub use add::Add;
pub use cat::Cat;
pub use coeff::Coeff;
pub use cross_entropy::{log_softmax, CrossEntropy};
pub use embedding::Embedding;
pub use matmul::MatMul;
pub use mul::Mul;
pub use sigmoid::Sigmoid;
pub use sum::Sum;
pub use tanh::Tanh;

#[cfg(test)]
pub(crate) use sigmoid::sigmoid as sigmoid_scalar;

/// A node operation in the computation graph.
pub trait Function: std::fmt::Debug + Send + Sync {
    /// Forward pass.
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError>;

    /// Gradients with respect to each input, in input order.
    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError>;

    /// Creates a boxed clone of this function node.
    fn clone_box(&self) -> Box<dyn Function>;
}

impl Clone for Box<dyn Function> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Rejects calls that do not supply exactly `expected` inputs.
pub(crate) fn expect_inputs(
    inps: &[&GeneralTensor],
    expected: usize,
    func_name: &str,
) -> Result<(), TensorError> {
    if inps.len() == expected {
        Ok(())
    } else {
        Err(TensorError::UnexpectedInputCount {
            expected,
            got: inps.len(),
            func_name: func_name.to_string(),
        })
    }
}

/// Placeholder gradient for index inputs.
pub(crate) fn no_grad() -> Tensor<f32> {
    Tensor::zeros(&[0])
}
