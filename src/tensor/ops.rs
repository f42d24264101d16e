//! Shape manipulation and dense kernels on [`Tensor`].

use super::{checked_numel, Tensor};
use crate::error::{RelGatError, Result};

impl Tensor {
    /// Reshape without copying semantics (the element order is preserved).
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the element count changes.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        if checked_numel(shape) != Some(self.numel()) {
            return Err(RelGatError::shape_mismatch(
                "reshape target",
                shape,
                &self.shape,
            ));
        }
        Tensor::from_vec(self.data.clone(), shape)
    }

    /// Select slice `index` along the first dimension, dropping that dimension.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `index` is out of range.
    pub fn select_first(&self, index: usize) -> Result<Tensor> {
        let first = self.rows();
        if self.ndim() == 0 || index >= first {
            return Err(RelGatError::dimension_mismatch(
                "select_first index bound",
                first,
                index,
            ));
        }
        let inner: usize = self.shape[1..].iter().product();
        let data = self.data[index * inner..(index + 1) * inner].to_vec();
        Tensor::from_vec(data, &self.shape[1..])
    }

    /// Gather rows of a rank-2 tensor: `out[i] = self[indices[i]]`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the tensor is not rank 2 or an index is out
    /// of range.
    pub fn index_select_rows(&self, indices: &[usize]) -> Result<Tensor> {
        let (rows, cols) = self.dims2("index_select input")?;
        let mut out = Vec::with_capacity(indices.len() * cols);
        for &idx in indices {
            if idx >= rows {
                return Err(RelGatError::dimension_mismatch(
                    "row index bound",
                    rows,
                    idx,
                ));
            }
            out.extend_from_slice(&self.data[idx * cols..(idx + 1) * cols]);
        }
        Tensor::from_vec(out, &[indices.len(), cols])
    }

    /// Concatenate two rank-2 tensors along columns.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if either tensor is not rank 2 or the row counts
    /// differ.
    pub fn cat_cols(&self, other: &Tensor) -> Result<Tensor> {
        let (rows, left) = self.dims2("cat_cols lhs")?;
        let (other_rows, right) = other.dims2("cat_cols rhs")?;
        if rows != other_rows {
            return Err(RelGatError::dimension_mismatch(
                "cat_cols rows",
                rows,
                other_rows,
            ));
        }
        let width = left + right;
        let mut out = Vec::with_capacity(rows * width);
        for r in 0..rows {
            out.extend_from_slice(&self.data[r * left..(r + 1) * left]);
            out.extend_from_slice(&other.data[r * right..(r + 1) * right]);
        }
        Tensor::from_vec(out, &[rows, width])
    }

    /// Elementwise sum of two tensors with identical shapes.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the shapes differ.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        if self.shape != other.shape {
            return Err(RelGatError::shape_mismatch("add rhs", &self.shape, &other.shape));
        }
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();
        Tensor::from_vec(data, &self.shape)
    }

    /// Apply `f` to every element.
    #[must_use]
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&v| f(v)).collect(),
            shape: self.shape.clone(),
            grad: None,
        }
    }

    /// Multiply every element by `factor` in place.
    pub fn scale_(&mut self, factor: f32) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    /// Compute `self · weightᵀ` for `self: [n, in]` and `weight: [out, in]`.
    ///
    /// This is the projection convention of [`crate::nn::Linear`].
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if either operand is not rank 2 or the inner
    /// dimensions differ.
    pub fn matmul_t(&self, weight: &Tensor) -> Result<Tensor> {
        let (n, k) = self.dims2("matmul lhs")?;
        let (out, wk) = weight.dims2("matmul weight")?;
        if k != wk {
            return Err(RelGatError::dimension_mismatch("input features", wk, k));
        }
        let mut result = vec![0.0f32; n * out];
        for i in 0..n {
            let x_row = &self.data[i * k..(i + 1) * k];
            for o in 0..out {
                let w_row = &weight.data[o * k..(o + 1) * k];
                result[i * out + o] = x_row.iter().zip(w_row).map(|(a, b)| a * b).sum();
            }
        }
        Tensor::from_vec(result, &[n, out])
    }
}
