//! Normalization layers.
//!
//! # References
//!
//! - Ioffe, S., & Szegedy, C. (2015). Batch normalization: Accelerating
//!   deep network training. ICML.

use super::init::zeros;
use super::module::Module;
use crate::error::{RelGatError, Result};
use crate::tensor::Tensor;

/// Batch Normalization for `[N, C]` inputs (Ioffe & Szegedy, 2015).
///
/// Normalizes each feature across the rows of the batch during training and
/// updates running statistics; evaluation uses the running statistics.
///
/// ```text
/// y = (x - mean) / sqrt(var + eps) * weight + bias
/// running = (1 - momentum) * running + momentum * batch_stat
/// ```
///
/// The batch variance used to normalize is biased; the variance folded into
/// `running_var` is unbiased.
#[derive(Debug, Clone)]
pub struct BatchNorm1d {
    num_features: usize,
    eps: f32,
    momentum: f32,
    /// Learnable scale
    weight: Tensor,
    /// Learnable shift
    bias: Tensor,
    /// Running mean (not learnable)
    running_mean: Tensor,
    /// Running variance (not learnable)
    running_var: Tensor,
    /// Training mode
    training: bool,
}

impl BatchNorm1d {
    /// Create a new `BatchNorm1d` layer in training mode.
    ///
    /// # Arguments
    ///
    /// * `num_features` - Number of features (columns)
    #[must_use]
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            eps: 1e-5,
            momentum: 0.1,
            weight: Tensor::ones(&[num_features]),
            bias: zeros(&[num_features]),
            running_mean: zeros(&[num_features]),
            running_var: Tensor::ones(&[num_features]),
            training: true,
        }
    }

    /// Set momentum for running statistics update.
    #[must_use]
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    /// Set epsilon for numerical stability.
    #[must_use]
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    #[must_use]
    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    #[must_use]
    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    /// Normalize `input: [N, num_features]`.
    ///
    /// Training mode mutates the running statistics, hence `&mut self`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the input is not `[N, num_features]`, or if
    /// fewer than two rows are given in training mode.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (rows, cols) = input.dims2("batch norm input")?;
        if cols != self.num_features {
            return Err(RelGatError::dimension_mismatch(
                "batch norm features",
                self.num_features,
                cols,
            ));
        }

        let (mean, var) = if self.training {
            if rows < 2 {
                return Err(RelGatError::ShapeMismatch {
                    expected: "at least 2 rows for training-mode batch norm".to_string(),
                    actual: format!("{rows} rows"),
                });
            }
            let (mean, biased_var) = column_stats(input.data(), rows, cols);
            let correction = rows as f32 / (rows - 1) as f32;
            let m = self.momentum;
            for c in 0..cols {
                let rm = &mut self.running_mean.data_mut()[c];
                *rm = (1.0 - m) * *rm + m * mean[c];
                let rv = &mut self.running_var.data_mut()[c];
                *rv = (1.0 - m) * *rv + m * biased_var[c] * correction;
            }
            (mean, biased_var)
        } else {
            (
                self.running_mean.data().to_vec(),
                self.running_var.data().to_vec(),
            )
        };

        let gamma = self.weight.data();
        let beta = self.bias.data();
        let mut output = vec![0.0f32; rows * cols];
        for (r, out_row) in output.chunks_mut(cols.max(1)).enumerate().take(rows) {
            let in_row = input.row(r);
            for c in 0..cols {
                let std_inv = 1.0 / (var[c] + self.eps).sqrt();
                out_row[c] = (in_row[c] - mean[c]) * std_inv * gamma[c] + beta[c];
            }
        }
        Tensor::from_vec(output, &[rows, cols])
    }
}

/// Per-column mean and biased variance of a row-major `[rows, cols]` buffer.
fn column_stats(data: &[f32], rows: usize, cols: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mean = vec![0.0f32; cols];
    for row in data.chunks(cols.max(1)).take(rows) {
        for (m, &v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    let n = rows as f32;
    mean.iter_mut().for_each(|m| *m /= n);

    let mut var = vec![0.0f32; cols];
    for row in data.chunks(cols.max(1)).take(rows) {
        for ((s, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
            let d = v - m;
            *s += d * d;
        }
    }
    var.iter_mut().for_each(|s| *s /= n);
    (mean, var)
}

impl Module for BatchNorm1d {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("weight".to_string(), &mut self.weight),
            ("bias".to_string(), &mut self.bias),
        ]
    }

    fn named_buffers(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("running_mean".to_string(), &self.running_mean),
            ("running_var".to_string(), &self.running_var),
        ]
    }

    fn named_buffers_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("running_mean".to_string(), &mut self.running_mean),
            ("running_var".to_string(), &mut self.running_var),
        ]
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn training(&self) -> bool {
        self.training
    }
}
