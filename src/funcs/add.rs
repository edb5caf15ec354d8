use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Element-wise addition: `Output = Input1 + Input2`.
///
/// The second input may also be a vector matching the last axis of a matrix
/// first input, in which case it is added to every row (bias broadcast).
#[derive(Debug, Clone, Default)]
pub struct Add;

impl Add {
    /// Creates a new Add function node, boxed for the Function trait.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

fn is_row_broadcast(lhs: &Tensor<f32>, rhs: &Tensor<f32>) -> bool {
    lhs.dim() == 2 && rhs.dim() == 1 && lhs.shape()[1] == rhs.shape()[0]
}

impl Function for Add {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Add")?;
        let lhs = inps[0].as_float()?;
        let rhs = inps[1].as_float()?;

        if is_row_broadcast(lhs, rhs) {
            let cols = rhs.size();
            let mut out = lhs.clone();
            for row in out.blob_mut().chunks_mut(cols) {
                for (o, &b) in row.iter_mut().zip(rhs.blob()) {
                    *o += b;
                }
            }
            return Ok(out);
        }
        lhs + rhs
    }

    /// Both inputs receive the output gradient; a broadcast bias receives it
    /// summed over rows.
    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "Add::grad")?;
        let lhs = inps[0].as_float()?;
        let rhs = inps[1].as_float()?;

        let rhs_grad = if is_row_broadcast(lhs, rhs) {
            out_grad.sum_rows()?
        } else {
            out_grad.clone()
        };
        Ok(vec![out_grad.clone(), rhs_grad])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
