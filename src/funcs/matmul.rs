use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Matrix product `[m, k] x [k, n] -> [m, n]`.
#[derive(Debug, Clone, Default)]
pub struct MatMul;

impl MatMul {
    /// Creates a new MatMul function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for MatMul {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "MatMul")?;
        inps[0].as_float()?.matmul(inps[1].as_float()?)
    }

    /// `dA = dOut · Bᵀ`, `dB = Aᵀ · dOut`.
    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "MatMul::grad")?;
        let lhs = inps[0].as_float()?;
        let rhs = inps[1].as_float()?;
        Ok(vec![
            out_grad.matmul(&rhs.transpose()?)?,
            lhs.transpose()?.matmul(out_grad)?,
        ])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
