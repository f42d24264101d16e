//! Gradient-based optimization over named parameter groups.
//!
//! Parameters live inside a [`Module`]; the optimizer addresses them by their
//! dotted names. Gradients are attached to the parameters by the training
//! loop (see [`Tensor::set_grad`]) before [`Optimizer::step`] is called.
//!
//! # Example
//!
//! ```
//! use relgat::nn::gnn::{EdgeGatConv, GatConfig};
//! use relgat::nn::optim::{Optimizer, ParamGroup, SGD};
//! use relgat::nn::Module;
//! use relgat::tensor::Tensor;
//!
//! let mut conv = EdgeGatConv::with_seed(GatConfig::new(4, 2, 3), Some(0)).unwrap();
//! let names = conv.named_parameters().into_iter().map(|(n, _)| n).collect();
//! let mut sgd = SGD::new(vec![ParamGroup::new(names, 0.1).with_momentum(0.9)]).unwrap();
//!
//! for (_, p) in conv.named_parameters_mut() {
//!     let ones = Tensor::ones(p.shape());
//!     p.set_grad(ones).unwrap();
//! }
//! sgd.step(&mut conv);
//! sgd.zero_grad(&mut conv);
//! ```
//!
//! # References
//!
//! - Robbins, H., & Monro, S. (1951). A stochastic approximation method.
//! - Sutskever, I., et al. (2013). On the importance of initialization and
//!   momentum in deep learning. ICML.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::error::{RelGatError, Result};
use crate::nn::module::Module;
use crate::nn::scheduler::MultiStepLR;
use crate::tensor::Tensor;
use crate::train::TrainConfig;

/// Common trait for optimizers.
pub trait Optimizer {
    /// Update every parameter of `module` that has a gradient.
    fn step(&mut self, module: &mut dyn Module);

    /// Clear the gradients of `module`.
    fn zero_grad(&mut self, module: &mut dyn Module) {
        module.zero_grad();
    }

    /// Get current learning rate.
    fn lr(&self) -> f32;

    /// Set learning rate (for schedulers).
    fn set_lr(&mut self, lr: f32);

    /// Learning rate of every parameter group.
    fn group_lrs(&self) -> Vec<f32> {
        vec![self.lr()]
    }

    /// Multiply every group's learning rate by `factor`.
    fn scale_lr(&mut self, factor: f32) {
        let lr = self.lr();
        self.set_lr(lr * factor);
    }
}

/// A set of named parameters sharing hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    /// Dotted parameter names, as reported by [`Module::named_parameters`]
    pub names: Vec<String>,
    /// Learning rate
    pub lr: f32,
    /// Momentum factor (0 = no momentum)
    pub momentum: f32,
    /// Weight decay (L2 regularization)
    pub weight_decay: f32,
}

impl ParamGroup {
    #[must_use]
    pub fn new(names: Vec<String>, lr: f32) -> Self {
        Self {
            names,
            lr,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }

    #[must_use]
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.lr.is_finite() && self.lr >= 0.0) {
            return Err(RelGatError::invalid_hyperparameter("lr", self.lr, ">= 0"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(RelGatError::invalid_hyperparameter(
                "momentum",
                self.momentum,
                "[0, 1)",
            ));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(RelGatError::invalid_hyperparameter(
                "weight_decay",
                self.weight_decay,
                ">= 0",
            ));
        }
        Ok(())
    }
}

/// Serializable optimizer state: group hyperparameters plus momentum buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerState {
    pub groups: Vec<ParamGroup>,
    /// Momentum buffer per parameter name
    pub momentum_buffers: BTreeMap<String, Tensor>,
}

/// Stochastic Gradient Descent with momentum over parameter groups.
///
/// Update rule (per group):
/// ```text
/// g   = grad + weight_decay * param
/// v_t = momentum * v_{t-1} + g
/// param = param - lr * v_t
/// ```
///
/// Parameters without a gradient are skipped and keep their momentum.
#[derive(Debug, Clone)]
pub struct SGD {
    groups: Vec<ParamGroup>,
    /// Velocity buffers for momentum, keyed by parameter name
    velocities: BTreeMap<String, Tensor>,
}

impl SGD {
    /// Create an optimizer over `groups`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` for a negative learning rate or weight
    /// decay, or a momentum outside `[0, 1)`.
    pub fn new(groups: Vec<ParamGroup>) -> Result<Self> {
        for group in &groups {
            group.validate()?;
        }
        Ok(Self {
            groups,
            velocities: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Snapshot of the optimizer state.
    #[must_use]
    pub fn state(&self) -> OptimizerState {
        OptimizerState {
            groups: self.groups.clone(),
            momentum_buffers: self.velocities.clone(),
        }
    }

    /// Restore group hyperparameters and momentum buffers.
    ///
    /// A state whose groups do not line up with this optimizer (different
    /// group count or parameter names) is rejected with a warning and nothing
    /// is loaded. Buffers for unknown parameters are ignored. Returns whether
    /// the state was applied.
    pub fn load_state(&mut self, state: &OptimizerState) -> bool {
        if state.groups.len() != self.groups.len() {
            warn!(
                saved = state.groups.len(),
                current = self.groups.len(),
                "optimizer state has a different number of parameter groups; not restored"
            );
            return false;
        }
        for (i, (saved, current)) in state.groups.iter().zip(&self.groups).enumerate() {
            if saved.names != current.names {
                warn!(
                    group = i,
                    "optimizer state parameter names differ from the model; not restored"
                );
                return false;
            }
        }

        self.groups.clone_from(&state.groups);
        self.velocities.clear();
        for (name, buffer) in &state.momentum_buffers {
            if self.groups.iter().any(|g| g.names.contains(name)) {
                self.velocities.insert(name.clone(), buffer.detach());
            } else {
                warn!(param = %name, "ignoring momentum buffer for unknown parameter");
            }
        }
        true
    }
}

/// Map each parameter name to the position of its group.
fn group_index(groups: &[ParamGroup]) -> HashMap<&str, usize> {
    let mut index = HashMap::new();
    for (g, group) in groups.iter().enumerate() {
        for name in &group.names {
            index.insert(name.as_str(), g);
        }
    }
    index
}

impl Optimizer for SGD {
    fn step(&mut self, module: &mut dyn Module) {
        let index = group_index(&self.groups);
        for (name, param) in module.named_parameters_mut() {
            let Some(&gi) = index.get(name.as_str()) else {
                continue;
            };
            let Some(grad) = param.grad().map(Tensor::detach) else {
                continue;
            };
            let group = &self.groups[gi];
            let grad_data = grad.data();

            if group.momentum == 0.0 {
                for (p, &g) in param.data_mut().iter_mut().zip(grad_data) {
                    *p -= group.lr * (g + group.weight_decay * *p);
                }
                continue;
            }

            let velocity = self
                .velocities
                .entry(name.clone())
                .or_insert_with(|| Tensor::zeros(param.shape()));
            if velocity.shape() != param.shape() {
                warn!(param = %name, "momentum buffer shape changed; resetting");
                *velocity = Tensor::zeros(param.shape());
            }

            let v = velocity.data_mut();
            let p = param.data_mut();
            for i in 0..p.len() {
                let g = grad_data[i] + group.weight_decay * p[i];
                v[i] = group.momentum * v[i] + g;
                p[i] -= group.lr * v[i];
            }
        }
    }

    fn lr(&self) -> f32 {
        self.groups.first().map_or(0.0, |g| g.lr)
    }

    fn set_lr(&mut self, lr: f32) {
        for group in &mut self.groups {
            group.lr = lr;
        }
    }

    fn group_lrs(&self) -> Vec<f32> {
        self.groups.iter().map(|g| g.lr).collect()
    }

    fn scale_lr(&mut self, factor: f32) {
        for group in &mut self.groups {
            group.lr *= factor;
        }
    }
}

/// Smallest learning rate across the optimizer's groups.
#[must_use]
pub fn smallest_lr(optimizer: &dyn Optimizer) -> f32 {
    optimizer
        .group_lrs()
        .into_iter()
        .fold(f32::INFINITY, f32::min)
}

/// Set every group's learning rate to `lr`.
pub fn update_lr(optimizer: &mut dyn Optimizer, lr: f32) {
    info!(lr, "learning rate updated");
    optimizer.set_lr(lr);
}

/// Build the training optimizer and its schedule.
///
/// Parameters whose name starts with one of `config.reduced_lr_prefixes` form
/// a first group trained at `lr / 10`; the rest form a second group at `lr`.
/// Both use `config.momentum` (0.9 by default) and weight decay `config.l2`. When `start_epoch > -1`
/// and the checkpoint carries optimizer state, that state is restored; a
/// state that does not fit is reported as a warning and training continues
/// from a fresh optimizer.
///
/// # Errors
///
/// Returns `InvalidHyperparameter` if `lr` or the configuration is invalid.
pub fn build_optimizer(
    module: &dyn Module,
    lr: f32,
    config: &TrainConfig,
    start_epoch: i64,
    checkpoint: Option<&Checkpoint>,
) -> Result<(SGD, MultiStepLR)> {
    config.validate()?;
    info!(lr, "effective learning rate");

    let (reduced, rest): (Vec<String>, Vec<String>) = module
        .named_parameters()
        .into_iter()
        .map(|(name, _)| name)
        .partition(|name| {
            config
                .reduced_lr_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        });

    let groups = vec![
        ParamGroup::new(reduced, lr / 10.0)
            .with_momentum(config.momentum)
            .with_weight_decay(config.l2),
        ParamGroup::new(rest, lr)
            .with_momentum(config.momentum)
            .with_weight_decay(config.l2),
    ];
    let mut optimizer = SGD::new(groups)?;

    if start_epoch > -1 {
        if let Some(ckpt) = checkpoint {
            match &ckpt.optimizer {
                Some(state) => {
                    info!("restoring optimizer state");
                    if !optimizer.load_state(state) {
                        warn!("error restoring optimizer; continuing with fresh state");
                    }
                }
                None => warn!("checkpoint has no optimizer state"),
            }
        }
    }

    let scheduler = MultiStepLR::from_steps(&config.steps, config.lr_decay);
    Ok((optimizer, scheduler))
}
