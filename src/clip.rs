//! Global gradient-norm clipping.

use tracing::debug;

use crate::nn::Module;

/// Gradient norms measured by [`clip_grad_norm`].
#[derive(Debug, Clone, PartialEq)]
pub struct GradNorm {
    /// L2 norm of all gradients viewed as one vector.
    pub total_norm: f32,
    /// `max_norm / (total_norm + 1e-6)`; gradients were scaled by it when it
    /// was below 1 and clipping was enabled.
    pub clip_coef: f32,
    /// Norm of each parameter's gradient, largest first.
    pub per_parameter: Vec<(String, f32)>,
}

/// Measure, and optionally clip, the global gradient norm of `module`.
///
/// Parameters without a gradient are ignored. When `clip` is set and the
/// coefficient is below 1, every gradient is multiplied by it in place.
pub fn clip_grad_norm(module: &mut dyn Module, max_norm: f32, clip: bool) -> GradNorm {
    let mut per_parameter: Vec<(String, f32)> = module
        .named_parameters()
        .into_iter()
        .filter_map(|(name, p)| p.grad().map(|g| (name, g.norm_l2())))
        .collect();

    let total_norm = per_parameter
        .iter()
        .map(|(_, n)| n * n)
        .sum::<f32>()
        .sqrt();
    let clip_coef = max_norm / (total_norm + 1e-6);

    if clip && clip_coef < 1.0 {
        for (_, p) in module.named_parameters_mut() {
            if let Some(grad) = p.grad_mut() {
                grad.scale_(clip_coef);
            }
        }
    }

    per_parameter.sort_by(|a, b| b.1.total_cmp(&a.1));
    debug!(total_norm, clip_coef, "gradient norm");
    for (name, norm) in &per_parameter {
        debug!(param = %name, norm, "parameter gradient norm");
    }

    GradNorm {
        total_norm,
        clip_coef,
        per_parameter,
    }
}

/// Clip the gradients of `module` to a global norm of `max_norm`.
pub fn grad_clip(module: &mut dyn Module, max_norm: f32) -> GradNorm {
    clip_grad_norm(module, max_norm, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    struct Params(Vec<(String, Tensor)>);

    impl Params {
        fn with_grads(grads: &[(&str, Option<Vec<f32>>)]) -> Self {
            Self(
                grads
                    .iter()
                    .map(|(name, grad)| {
                        let mut p = Tensor::zeros(&[grad.as_ref().map_or(1, Vec::len)]);
                        if let Some(g) = grad {
                            p.set_grad(Tensor::from_slice(g)).expect("same shape");
                        }
                        (name.to_string(), p)
                    })
                    .collect(),
            )
        }

        fn grad(&self, i: usize) -> &[f32] {
            self.0[i].1.grad().expect("has grad").data()
        }
    }

    impl Module for Params {
        fn named_parameters(&self) -> Vec<(String, &Tensor)> {
            self.0.iter().map(|(n, p)| (n.clone(), p)).collect()
        }

        fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
            self.0.iter_mut().map(|(n, p)| (n.clone(), p)).collect()
        }
    }

    #[test]
    fn test_total_norm_without_clipping() {
        let mut model = Params::with_grads(&[
            ("a", Some(vec![3.0, 0.0])),
            ("b", Some(vec![4.0])),
            ("c", None),
        ]);
        let norms = clip_grad_norm(&mut model, 1.0, false);

        assert!((norms.total_norm - 5.0).abs() < 1e-6);
        assert!((norms.clip_coef - 0.2).abs() < 1e-6);
        // untouched
        assert_eq!(model.grad(0), &[3.0, 0.0]);
        assert_eq!(
            norms.per_parameter,
            vec![("b".to_string(), 4.0), ("a".to_string(), 3.0)]
        );
    }

    #[test]
    fn test_grad_clip_scales_to_max_norm() {
        let mut model = Params::with_grads(&[("a", Some(vec![3.0, 0.0])), ("b", Some(vec![4.0]))]);
        grad_clip(&mut model, 1.0);

        let after = clip_grad_norm(&mut model, 1.0, false);
        assert!((after.total_norm - 1.0).abs() < 1e-4);
        assert!((model.grad(0)[0] - 0.6).abs() < 1e-5);
        assert!((model.grad(1)[0] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_small_gradients_are_not_scaled_up() {
        let mut model = Params::with_grads(&[("a", Some(vec![0.1]))]);
        let norms = grad_clip(&mut model, 5.0);
        assert!(norms.clip_coef > 1.0);
        assert_eq!(model.grad(0), &[0.1]);
    }

    #[test]
    fn test_no_gradients() {
        let mut model = Params::with_grads(&[("a", None)]);
        let norms = grad_clip(&mut model, 5.0);
        assert_eq!(norms.total_norm, 0.0);
        assert!(norms.per_parameter.is_empty());
    }
}
