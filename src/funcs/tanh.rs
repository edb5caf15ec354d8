use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Element-wise hyperbolic tangent.
#[derive(Debug, Clone, Default)]
pub struct Tanh;

impl Tanh {
    /// Creates a new Tanh function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Tanh {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Tanh")?;
        Ok(inps[0].as_float()?.map_values(f32::tanh))
    }

    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Tanh::grad")?;
        let x = inps[0].as_float()?;
        Ok(vec![x.zip_with(out_grad, |x, g| {
            let t = x.tanh();
            g * (1.0 - t * t)
        })?])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
