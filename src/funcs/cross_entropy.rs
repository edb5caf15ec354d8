use super::{expect_inputs, no_grad, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Log-softmax of a single logit row.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let lse = max + logits.iter().map(|&l| (l - max).exp()).sum::<f32>().ln();
    logits.iter().map(|&l| l - lse).collect()
}

/// Per-row sparse softmax cross-entropy, clipped to `[min, max]`.
///
/// Inputs are `[logits: [batch, vocab], targets: [batch]]`; the output has
/// shape `[batch]`. Rows whose raw loss lies outside the clip range pass no
/// gradient.
#[derive(Debug, Clone)]
pub struct CrossEntropy {
    min: f32,
    max: f32,
}

impl CrossEntropy {
    /// Cross-entropy clipped to `[min, max]`.
    pub fn clipped(min: f32, max: f32) -> Box<dyn Function> {
        Box::new(Self { min, max })
    }

    fn rows<'a>(
        inps: &[&'a GeneralTensor],
    ) -> Result<(&'a Tensor<f32>, &'a Tensor<usize>, usize), TensorError> {
        let logits = inps[0].as_float()?;
        let targets = inps[1].as_usize()?;
        let (batch, vocab) = logits.matrix_dims()?;
        if vocab == 0 {
            return Err(TensorError::InvalidShape {
                shape: logits.shape().to_vec(),
                len: logits.size(),
            });
        }
        targets.expect_shape(&[batch])?;
        if let Some(&bad) = targets.blob().iter().find(|&&t| t >= vocab) {
            return Err(TensorError::IndexOutOfBounds {
                index: bad,
                size: vocab,
            });
        }
        Ok((logits, targets, vocab))
    }
}

impl Function for CrossEntropy {
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "CrossEntropy")?;
        let (logits, targets, vocab) = Self::rows(inps)?;

        let losses = logits
            .blob()
            .chunks(vocab)
            .zip(targets.blob())
            .map(|(row, &t)| (-log_softmax(row)[t]).clamp(self.min, self.max))
            .collect();
        Tensor::raw(&[targets.size()], losses)
    }

    /// `dLogits = dOut * (softmax(logits) - onehot(target))` inside the clip range.
    fn grad(
        &self,
        inps: &[&GeneralTensor],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "CrossEntropy::grad")?;
        let (logits, targets, vocab) = Self::rows(inps)?;
        out_grad.expect_shape(targets.shape())?;

        let mut logits_grad = Tensor::<f32>::zeros(logits.shape());
        let rows = logits
            .blob()
            .chunks(vocab)
            .zip(logits_grad.blob_mut().chunks_mut(vocab))
            .zip(targets.blob().iter().zip(out_grad.blob()));
        for ((row, grad_row), (&t, &g)) in rows {
            let log_probs = log_softmax(row);
            let raw = -log_probs[t];
            if raw < self.min || raw > self.max {
                continue;
            }
            for (d, &lp) in grad_row.iter_mut().zip(&log_probs) {
                *d = g * lp.exp();
            }
            grad_row[t] -= g;
        }
        Ok(vec![logits_grad, no_grad()])
    }

    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn inputs(logits: Vec<f32>, vocab: usize, targets: Vec<usize>) -> (GeneralTensor, GeneralTensor) {
        let batch = targets.len();
        (
            GeneralTensor::Float(Tensor::raw(&[batch, vocab], logits).unwrap()),
            GeneralTensor::Usize(Tensor::raw(&[batch], targets).unwrap()),
        )
    }

    #[test]
    fn test_uniform_logits_give_ln_vocab() {
        let (l, t) = inputs(vec![0.0; 10], 5, vec![1, 4]);
        let out = CrossEntropy { min: 0.0, max: 45.0 }.run(&[&l, &t]).unwrap();
        for &v in out.blob() {
            assert_abs_diff_eq!(v, 5f32.ln(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_loss_above_ceiling_reports_exactly_45() {
        let (l, t) = inputs(vec![0.0, 0.0, -100.0], 3, vec![2]);
        let mut ce = CrossEntropy { min: 0.0, max: 45.0 };
        let out = ce.run(&[&l, &t]).unwrap();
        assert_eq!(out.blob(), &[45.0]);

        let grads = ce.grad(&[&l, &t], &Tensor::constant(&[1], 1.0)).unwrap();
        assert!(grads[0].blob().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_grad_is_softmax_minus_onehot() {
        let (l, t) = inputs(vec![1.0, 2.0, 3.0], 3, vec![0]);
        let ce = CrossEntropy { min: 0.0, max: 45.0 };
        let grads = ce.grad(&[&l, &t], &Tensor::constant(&[1], 2.0)).unwrap();
        let probs: Vec<f32> = log_softmax(&[1.0, 2.0, 3.0]).iter().map(|v| v.exp()).collect();
        assert_abs_diff_eq!(grads[0].blob()[0], 2.0 * (probs[0] - 1.0), epsilon = 1e-6);
        assert_abs_diff_eq!(grads[0].blob()[1], 2.0 * probs[1], epsilon = 1e-6);
        assert_abs_diff_eq!(grads[0].blob()[2], 2.0 * probs[2], epsilon = 1e-6);
    }

    #[test]
    fn test_log_softmax_is_normalized() {
        let lp = log_softmax(&[0.5, -1.0, 3.0, 200.0]);
        let total: f32 = lp.iter().map(|v| v.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    }
}
