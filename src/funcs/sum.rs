use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Reduces a tensor to a scalar (shape `[]`) by summation.
#[derive(Debug, Clone, Default)]
pub struct Sum;

impl Sum {
    /// Creates a new Sum function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Sum {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Sum")?;
        Tensor::raw(&[], vec![inps[0].as_float()?.sum()])
    }

    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Sum::grad")?;
        out_grad.expect_shape(&[])?;
        Ok(vec![Tensor::constant(inps[0].shape(), out_grad.blob()[0])])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
