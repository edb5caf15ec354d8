use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Element-wise (Hadamard) product of two same-shaped tensors.
#[derive(Debug, Clone, Default)]
pub struct Mul;

impl Mul {
    /// Creates a new Mul function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Mul {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Mul")?;
        inps[0].as_float()? * inps[1].as_float()?
    }

    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "Mul::grad")?;
        let lhs = inps[0].as_float()?;
        let rhs = inps[1].as_float()?;
        Ok(vec![(out_grad * rhs)?, (out_grad * lhs)?])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
