//! Weight initialization functions.
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.

use crate::tensor::Tensor;
use rand::Rng;

/// Glorot/Xavier uniform initialization.
///
/// Samples from U(-a, a) where a = sqrt(6 / (`fan_in` + `fan_out`)).
///
/// For attention vectors shaped `[heads, channels]` the fans are the two
/// trailing dimensions, matching the usual GAT initialization.
#[must_use]
pub fn glorot<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, fan_out: usize, rng: &mut R) -> Tensor {
    let a = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    uniform(shape, -a, a, rng)
}

/// Uniform distribution initialization.
pub(crate) fn uniform<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Tensor {
    let numel: usize = shape.iter().product();
    let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(low..=high)).collect();
    Tensor::new(&data, shape)
}

/// Zeros initialization.
pub(crate) fn zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(shape)
}
