use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Numerically stable logistic function.
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Element-wise sigmoid, used by the input, forget and output gates.
#[derive(Debug, Clone, Default)]
pub struct Sigmoid;

impl Sigmoid {
    /// Creates a new Sigmoid function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Sigmoid {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Sigmoid")?;
        Ok(inps[0].as_float()?.map_values(sigmoid))
    }

    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Sigmoid::grad")?;
        let x = inps[0].as_float()?;
        Ok(vec![x.zip_with(out_grad, |x, g| {
            let s = sigmoid(x);
            g * s * (1.0 - s)
        })?])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
