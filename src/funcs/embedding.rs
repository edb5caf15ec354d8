use super::{expect_inputs, no_grad, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Row lookup: `[batch]` token ids into a `[vocab, dim]` table gives `[batch, dim]`.
///
/// Inputs are `[ids, table]`.
#[derive(Debug, Clone, Default)]
pub struct Embedding;

impl Embedding {
    /// Creates a new Embedding function node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Embedding {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Embedding")?;
        let ids = inps[0].as_usize()?;
        let table = inps[1].as_float()?;
        let (vocab, dim) = table.matrix_dims()?;

        let mut blob = Vec::with_capacity(ids.size() * dim);
        for &id in ids.blob() {
            if id >= vocab {
                return Err(TensorError::IndexOutOfBounds {
                    index: id,
                    size: vocab,
                });
            }
            blob.extend_from_slice(&table.blob()[id * dim..(id + 1) * dim]);
        }
        Tensor::raw(&[ids.size(), dim], blob)
    }

    /// Scatter-adds each output row's gradient into the row it was read from.
    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "Embedding::grad")?;
        let ids = inps[0].as_usize()?;
        let table = inps[1].as_float()?;
        let (_, dim) = table.matrix_dims()?;
        out_grad.expect_shape(&[ids.size(), dim])?;

        let mut table_grad = Tensor::<f32>::zeros(table.shape());
        for (row, &id) in ids.blob().iter().enumerate() {
            let src = &out_grad.blob()[row * dim..(row + 1) * dim];
            let dst = &mut table_grad.blob_mut()[id * dim..(id + 1) * dim];
            for (d, &s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
        Ok(vec![no_grad(), table_grad])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
