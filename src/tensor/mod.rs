//! Dense `f32` tensor used throughout relgat.
//!
//! Tensors are row-major buffers paired with a shape. A tensor may carry a
//! gradient slot: gradients are produced by an external differentiation engine
//! and consumed by [`crate::nn::optim`] and [`crate::clip`].

use std::fmt;

use crate::error::{RelGatError, Result};

/// A dense, row-major `f32` tensor with an optional gradient.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    /// Underlying data storage
    data: Vec<f32>,

    /// Shape of the tensor
    shape: Vec<usize>,

    /// Gradient supplied by the training loop
    grad: Option<Box<Tensor>>,
}

impl Tensor {
    /// Create a new tensor from a slice with the given shape.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the product of shape dimensions.
    /// Use [`Tensor::from_vec`] for caller-supplied data.
    #[must_use]
    pub fn new(data: &[f32], shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: data.to_vec(),
            shape: shape.to_vec(),
            grad: None,
        }
    }

    /// Create a tensor from an owned buffer, validating the element count.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `data.len()` is not the product of `shape`.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let Some(expected_len) = checked_numel(shape) else {
            return Err(RelGatError::ShapeMismatch {
                expected: format!("an addressable element count for shape {shape:?}"),
                actual: format!("{} elements", data.len()),
            });
        };
        if data.len() != expected_len {
            return Err(RelGatError::ShapeMismatch {
                expected: format!("{expected_len} elements for shape {shape:?}"),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            grad: None,
        })
    }

    /// Create a tensor from a 1D slice (vector).
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self::new(data, &[data.len()])
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with `value`.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![value; len],
            shape: shape.to_vec(),
            grad: None,
        }
    }

    /// Get the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Get the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get a reference to the underlying data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Get a mutable reference to the underlying data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the tensor and return its buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Number of rows of a rank-2 tensor (first dimension otherwise).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Number of columns of a rank-2 tensor (product of trailing dims otherwise).
    #[must_use]
    pub fn cols(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Borrow row `i` of a rank-2 tensor.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        let cols = self.cols();
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Require the tensor to be rank 2, returning `(rows, cols)`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` naming `context` if the rank differs.
    pub fn dims2(&self, context: &str) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[r, c] => Ok((r, c)),
            other => Err(RelGatError::rank_mismatch(context, 2, other)),
        }
    }

    /// Get a scalar value (for 0-d or 1-element tensors).
    ///
    /// # Panics
    ///
    /// Panics if the tensor has more than one element.
    #[must_use]
    pub fn item(&self) -> f32 {
        assert_eq!(
            self.numel(),
            1,
            "item() only works on tensors with exactly 1 element, got {}",
            self.numel()
        );
        self.data[0]
    }

    /// Get the gradient tensor (if one was supplied).
    #[must_use]
    pub fn grad(&self) -> Option<&Tensor> {
        self.grad.as_deref()
    }

    /// Get a mutable reference to the gradient.
    pub fn grad_mut(&mut self) -> Option<&mut Tensor> {
        self.grad.as_deref_mut()
    }

    /// Attach a gradient computed by the training loop.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the gradient shape differs from the tensor.
    pub fn set_grad(&mut self, grad: Tensor) -> Result<()> {
        if grad.shape != self.shape {
            return Err(RelGatError::shape_mismatch(
                "gradient",
                &self.shape,
                &grad.shape,
            ));
        }
        self.grad = Some(Box::new(grad.detach()));
        Ok(())
    }

    /// Clear the gradient.
    pub fn zero_grad_(&mut self) {
        self.grad = None;
    }

    /// Copy of the tensor without its gradient.
    #[must_use]
    pub fn detach(&self) -> Tensor {
        Tensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: None,
        }
    }

    /// Euclidean norm of all elements.
    #[must_use]
    pub fn norm_l2(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

mod ops;

/// Product of `shape`, or `None` if it does not fit in `usize`.
#[must_use]
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("has_grad", &self.grad.is_some())
            .finish_non_exhaustive()
    }
}
