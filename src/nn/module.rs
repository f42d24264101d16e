//! The [`Module`] trait shared by every layer.

use crate::tensor::Tensor;

/// Interface for layers that own learnable parameters.
///
/// Layers expose their parameters and buffers by dotted name so that state
/// dicts, optimizer parameter groups, and gradient clipping can address them
/// (`convs.0.lin_l.weight`, `bns.1.running_var`). Forward passes are
/// inherent methods because their inputs differ per layer.
pub trait Module {
    /// Learnable parameters, by name.
    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    /// Mutable access to learnable parameters, by name.
    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    /// Non-learnable state saved with the module (e.g. running statistics).
    fn named_buffers(&self) -> Vec<(String, &Tensor)> {
        Vec::new()
    }

    /// Mutable access to buffers, by name.
    fn named_buffers_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        Vec::new()
    }

    /// Switch to training mode.
    fn train(&mut self) {}

    /// Switch to evaluation mode.
    fn eval(&mut self) {}

    /// Whether the module is in training mode.
    fn training(&self) -> bool {
        false
    }

    /// Total number of learnable scalars.
    fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.numel()).sum()
    }

    /// Clear every parameter gradient.
    fn zero_grad(&mut self) {
        for (_, param) in self.named_parameters_mut() {
            param.zero_grad_();
        }
    }
}

/// Join a parent prefix and a child name with a dot.
pub(crate) fn prefixed(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
