//! Bias-free linear projection.
//!
//! Implements y = xWᵀ with `W: [out_features, in_features]`.

use super::init::glorot;
use super::module::Module;
use crate::error::Result;
use crate::tensor::Tensor;
use rand::Rng;

/// Linear projection without bias, as used for the node and edge projections
/// of the attention layer.
///
/// # Shape
///
/// - Input: `(n, in_features)`
/// - Output: `(n, out_features)`
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weight matrix, shape: [out_features, in_features]
    weight: Tensor,

    /// Number of input features
    in_features: usize,

    /// Number of output features
    out_features: usize,
}

impl Linear {
    /// Create a Linear layer with Glorot initialization and no bias.
    pub fn without_bias<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let weight = glorot(&[out_features, in_features], in_features, out_features, rng);
        Self {
            weight,
            in_features,
            out_features,
        }
    }

    /// Get the input feature dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Get the output feature dimension.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Get reference to weight tensor.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Forward pass: `x · Wᵀ`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `input` is not `[n, in_features]`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        input.matmul_t(&self.weight)
    }
}

impl Module for Linear {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("weight".to_string(), &self.weight)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("weight".to_string(), &mut self.weight)]
    }
}
