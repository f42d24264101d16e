//! Functional interface for the activations and regularizers used by the
//! attention stack.
//!
//! These are stateless: randomness comes from the caller's RNG handle so a
//! seeded generator reproduces a training-mode forward pass exactly.
//!
//! # Example
//!
//! ```
//! use relgat::nn::functional as F;
//! use relgat::tensor::Tensor;
//!
//! let x = Tensor::from_slice(&[-1.0, 2.0]);
//! assert_eq!(F::relu(&x).data(), &[0.0, 2.0]);
//! assert_eq!(F::leaky_relu(&x, 0.2).data(), &[-0.2, 2.0]);
//! ```

use crate::tensor::Tensor;
use rand::Rng;

/// `ReLU` activation: max(0, x)
#[must_use]
pub fn relu(x: &Tensor) -> Tensor {
    x.map(|v| v.max(0.0))
}

/// Scalar Leaky `ReLU`.
#[inline]
#[must_use]
pub fn leaky_relu_scalar(v: f32, negative_slope: f32) -> f32 {
    if v > 0.0 {
        v
    } else {
        negative_slope * v
    }
}

/// Leaky `ReLU` activation: `max(negative_slope` * x, x)
#[must_use]
pub fn leaky_relu(x: &Tensor, negative_slope: f32) -> Tensor {
    x.map(|v| leaky_relu_scalar(v, negative_slope))
}

/// Inverted dropout.
///
/// In training mode each element is zeroed with probability `p` and the
/// survivors are scaled by `1 / (1 - p)`. Outside training mode, or with
/// `p == 0`, the input is returned unchanged and `rng` is not touched.
#[must_use]
pub fn dropout<R: Rng + ?Sized>(x: &Tensor, p: f32, training: bool, rng: &mut R) -> Tensor {
    let mut out = x.detach();
    if training {
        dropout_in_place(out.data_mut(), p, rng);
    }
    out
}

/// Inverted dropout applied in place to a raw buffer.
pub(crate) fn dropout_in_place<R: Rng + ?Sized>(data: &mut [f32], p: f32, rng: &mut R) {
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        data.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    let scale = 1.0 / (1.0 - p);
    for v in data.iter_mut() {
        *v = if rng.gen::<f32>() < p { 0.0 } else { *v * scale };
    }
}
