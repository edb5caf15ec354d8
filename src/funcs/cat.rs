use super::Function;
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Concatenation along the first axis.
///
/// All inputs must agree on every axis but the first. Concatenating the
/// `[batch]` loss vectors of successive steps yields a step-major vector.
#[derive(Debug, Clone, Default)]
pub struct Cat;

impl Cat {
    /// Creates a new Cat function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Cat {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        let first = inps
            .first()
            .ok_or_else(|| TensorError::UnexpectedInputCount {
                expected: 1,
                got: 0,
                func_name: "Cat".to_string(),
            })?
            .as_float()?;
        let tail = first.shape().get(1..).unwrap_or_default().to_vec();

        let mut rows = 0;
        let mut blob = Vec::new();
        for inp in inps {
            let t = inp.as_float()?;
            let (&n, rest) = t.shape().split_first().ok_or_else(|| {
                TensorError::InvalidShape {
                    shape: t.shape().to_vec(),
                    len: t.size(),
                }
            })?;
            if rest != tail.as_slice() {
                return Err(TensorError::ShapeMismatch {
                    expected: tail,
                    got: rest.to_vec(),
                });
            }
            rows += n;
            blob.extend_from_slice(t.blob());
        }

        let mut shape = vec![rows];
        shape.extend_from_slice(&tail);
        Tensor::raw(&shape, blob)
    }

    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        let mut offset = 0;
        inps.iter()
            .map(|inp| {
                let t = inp.as_float()?;
                let slice = out_grad
                    .blob()
                    .get(offset..offset + t.size())
                    .ok_or_else(|| TensorError::ShapeMismatch {
                        expected: t.shape().to_vec(),
                        got: out_grad.shape().to_vec(),
                    })?;
                offset += t.size();
                Tensor::raw(t.shape(), slice.to_vec())
            })
            .collect()
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
