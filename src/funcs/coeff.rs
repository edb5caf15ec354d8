use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Multiplication by a constant scalar.
#[derive(Debug, Clone)]
pub struct Coeff {
    coeff: f32,
}

impl Coeff {
    /// Creates a node computing `coeff * input`.
    pub fn new(coeff: f32) -> Box<dyn Function> {
        Box::new(Self { coeff })
    }
}

impl Function for Coeff {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Coeff")?;
        let c = self.coeff;
        Ok(inps[0].as_float()?.map_values(|v| v * c))
    }

    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Coeff::grad")?;
        let c = self.coeff;
        Ok(vec![out_grad.map_values(|g| g * c)])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
