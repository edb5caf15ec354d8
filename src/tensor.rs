use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by tensor construction and arithmetic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    /// Two operands (or an operand and an expectation) disagree on shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Shape the operation required.
        expected: Vec<usize>,
        /// Shape it was given.
        got: Vec<usize>,
    },
    /// The blob length does not match the product of the shape.
    #[error("invalid shape {shape:?} for {len} elements")]
    InvalidShape {
        /// Requested shape.
        shape: Vec<usize>,
        /// Number of elements supplied.
        len: usize,
    },
    /// An index (row or token id) is outside the valid range.
    #[error("index {index} out of bounds for dimension of size {size}")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Size of the indexed dimension.
        size: usize,
    },
    /// A float tensor was expected where an index tensor was given, or vice versa.
    #[error("unexpected tensor type, expected {expected}")]
    UnexpectedType {
        /// Name of the expected element type.
        expected: &'static str,
    },
    /// A function node received the wrong number of inputs.
    #[error("{func_name} expects {expected} inputs, got {got}")]
    UnexpectedInputCount {
        /// Number of inputs the function takes.
        expected: usize,
        /// Number of inputs supplied.
        got: usize,
        /// Function that rejected the call.
        func_name: String,
    },
    /// The normal initializer rejected its standard deviation.
    #[error("invalid initializer: {0}")]
    Initializer(String),
}

/// Dense row-major tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<V> {
    shape: Vec<usize>,
    blob: Vec<V>,
}

/// Type-erased tensor stored in a computation graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneralTensor {
    /// Values that can carry gradients.
    Float(Tensor<f32>),
    /// Token ids and other index data.
    Usize(Tensor<usize>),
}

impl GeneralTensor {
    /// Borrows the float tensor, failing on index tensors.
    pub const fn as_float(&self) -> Result<&Tensor<f32>, TensorError> {
        match self {
            Self::Float(t) => Ok(t),
            Self::Usize(_) => Err(TensorError::UnexpectedType { expected: "f32" }),
        }
    }

    /// Borrows the index tensor, failing on float tensors.
    pub const fn as_usize(&self) -> Result<&Tensor<usize>, TensorError> {
        match self {
            Self::Usize(t) => Ok(t),
            Self::Float(_) => Err(TensorError::UnexpectedType { expected: "usize" }),
        }
    }

    /// Shape of the underlying tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Float(t) => t.shape(),
            Self::Usize(t) => t.shape(),
        }
    }
}

impl<V: Copy + Default> Tensor<V> {
    /// Wraps `blob` with `shape`, checking that the sizes agree.
    pub fn raw(shape: &[usize], blob: Vec<V>) -> Result<Self, TensorError> {
        if shape.iter().product::<usize>() != blob.len() {
            return Err(TensorError::InvalidShape {
                shape: shape.to_vec(),
                len: blob.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            blob,
        })
    }

    /// Tensor filled with `V::default()`.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::constant(shape, V::default())
    }

    /// Tensor filled with `value`.
    pub fn constant(shape: &[usize], value: V) -> Self {
        Self {
            shape: shape.to_vec(),
            blob: vec![value; shape.iter().product()],
        }
    }

    /// Shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major storage.
    pub fn blob(&self) -> &[V] {
        &self.blob
    }

    /// Mutable flat row-major storage.
    pub fn blob_mut(&mut self) -> &mut [V] {
        &mut self.blob
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    /// Sub-tensor at `index` along the first axis.
    pub fn get(&self, index: usize) -> Result<Self, TensorError> {
        let (&rows, rest) = self
            .shape
            .split_first()
            .ok_or_else(|| TensorError::InvalidShape {
                shape: self.shape.clone(),
                len: self.blob.len(),
            })?;
        if index >= rows {
            return Err(TensorError::IndexOutOfBounds { index, size: rows });
        }
        let stride: usize = rest.iter().product();
        Ok(Self {
            shape: rest.to_vec(),
            blob: self.blob[index * stride..(index + 1) * stride].to_vec(),
        })
    }

    /// Same data viewed with a different shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, TensorError> {
        Self::raw(shape, self.blob.clone())
    }

    /// Swaps the two axes of a matrix.
    pub fn transpose(&self) -> Result<Self, TensorError> {
        let (rows, cols) = self.matrix_dims()?;
        let mut blob = Vec::with_capacity(self.blob.len());
        for c in 0..cols {
            for r in 0..rows {
                blob.push(self.blob[r * cols + c]);
            }
        }
        Ok(Self {
            shape: vec![cols, rows],
            blob,
        })
    }

    /// `(rows, cols)` of a two-dimensional tensor.
    pub fn matrix_dims(&self) -> Result<(usize, usize), TensorError> {
        match self.shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            _ => Err(TensorError::InvalidShape {
                shape: self.shape.clone(),
                len: self.blob.len(),
            }),
        }
    }

    /// Fails unless the tensor has exactly `shape`.
    pub fn expect_shape(&self, shape: &[usize]) -> Result<(), TensorError> {
        if self.shape == shape {
            Ok(())
        } else {
            Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: self.shape.clone(),
            })
        }
    }
}

impl Tensor<f32> {
    /// Tensor with entries drawn from `N(0, stddev²)`.
    pub fn rand_normal<R: Rng>(
        rng: &mut R,
        shape: &[usize],
        stddev: f32,
    ) -> Result<Self, TensorError> {
        let normal =
            Normal::new(0.0, stddev).map_err(|e| TensorError::Initializer(e.to_string()))?;
        let blob = (0..shape.iter().product::<usize>())
            .map(|_| normal.sample(rng))
            .collect();
        Ok(Self {
            shape: shape.to_vec(),
            blob,
        })
    }

    /// Applies `f` to every element.
    #[must_use]
    pub fn map_values<F: Fn(f32) -> f32 + Sync + Send>(&self, f: F) -> Self {
        Self {
            shape: self.shape.clone(),
            blob: self.blob.par_iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combines two same-shaped tensors element by element.
    pub fn zip_with<F: Fn(f32, f32) -> f32 + Sync + Send>(
        &self,
        other: &Self,
        f: F,
    ) -> Result<Self, TensorError> {
        other.expect_shape(&self.shape)?;
        Ok(Self {
            shape: self.shape.clone(),
            blob: self
                .blob
                .par_iter()
                .zip(other.blob.par_iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Matrix product `[m, k] x [k, n] -> [m, n]`, rows computed in parallel.
    pub fn matmul(&self, other: &Self) -> Result<Self, TensorError> {
        let (m, k) = self.matrix_dims()?;
        let (k2, n) = other.matrix_dims()?;
        if k != k2 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![k, n],
                got: other.shape.clone(),
            });
        }
        let mut blob = vec![0.0; m * n];
        if n > 0 {
            blob.par_chunks_mut(n).enumerate().for_each(|(r, out)| {
                let lhs = &self.blob[r * k..(r + 1) * k];
                for (i, &a) in lhs.iter().enumerate() {
                    let rhs = &other.blob[i * n..(i + 1) * n];
                    for (o, &b) in out.iter_mut().zip(rhs) {
                        *o += a * b;
                    }
                }
            });
        }
        Ok(Self {
            shape: vec![m, n],
            blob,
        })
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f32 {
        self.blob.iter().sum()
    }

    /// Sum of squared elements.
    pub fn squared_norm(&self) -> f32 {
        self.blob.iter().map(|v| v * v).sum()
    }

    /// Sums a matrix over its rows, yielding one value per column.
    pub fn sum_rows(&self) -> Result<Self, TensorError> {
        let (rows, cols) = self.matrix_dims()?;
        let mut blob = vec![0.0; cols];
        for r in 0..rows {
            for (acc, &v) in blob.iter_mut().zip(&self.blob[r * cols..(r + 1) * cols]) {
                *acc += v;
            }
        }
        Ok(Self {
            shape: vec![cols],
            blob,
        })
    }

    /// True when no element is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.blob.iter().all(|v| v.is_finite())
    }
}

impl std::ops::Add for &Tensor<f32> {
    type Output = Result<Tensor<f32>, TensorError>;

    fn add(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl std::ops::Mul for &Tensor<f32> {
    type Output = Result<Tensor<f32>, TensorError>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a * b)
    }
}
