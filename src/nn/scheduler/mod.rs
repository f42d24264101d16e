//! Learning rate schedulers.

use tracing::info;

use super::optim::Optimizer;

/// Common trait for learning rate schedulers.
pub trait LRScheduler {
    /// Advance one epoch and adjust the optimizer's learning rate.
    fn step(&mut self, optimizer: &mut dyn Optimizer);

    /// Number of completed `step` calls.
    fn last_epoch(&self) -> usize;
}

/// Multiply every group's learning rate by `gamma` each time the epoch count
/// reaches a milestone.
///
/// ```text
/// lr = initial_lr * gamma^(number of milestones <= epoch)
/// ```
///
/// # Example
///
/// ```
/// use relgat::nn::scheduler::{LRScheduler, MultiStepLR};
///
/// let scheduler = MultiStepLR::from_steps(&[2, 5], 0.1);
/// assert_eq!(scheduler.milestones(), &[3, 6]);
/// assert_eq!(scheduler.last_epoch(), 0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepLR {
    /// Sorted epochs at which the learning rate decays
    milestones: Vec<usize>,
    gamma: f32,
    last_epoch: usize,
}

impl MultiStepLR {
    /// Create a scheduler decaying at the given epochs.
    #[must_use]
    pub fn new(mut milestones: Vec<usize>, gamma: f32) -> Self {
        milestones.sort_unstable();
        Self {
            milestones,
            gamma,
            last_epoch: 0,
        }
    }

    /// Create a scheduler from training steps, decaying one epoch after each
    /// listed step.
    #[must_use]
    pub fn from_steps(steps: &[usize], gamma: f32) -> Self {
        Self::new(steps.iter().map(|s| s + 1).collect(), gamma)
    }

    #[must_use]
    pub fn milestones(&self) -> &[usize] {
        &self.milestones
    }

    #[must_use]
    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    /// Resume at `epoch` without touching any learning rate.
    pub fn set_last_epoch(&mut self, epoch: usize) {
        self.last_epoch = epoch;
    }
}

impl LRScheduler for MultiStepLR {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        self.last_epoch += 1;
        // repeated milestones decay more than once
        let hits = self
            .milestones
            .iter()
            .filter(|&&m| m == self.last_epoch)
            .count();
        if hits > 0 {
            let factor = self.gamma.powi(hits as i32);
            optimizer.scale_lr(factor);
            info!(
                epoch = self.last_epoch,
                lr = optimizer.lr(),
                "learning rate decayed"
            );
        }
    }

    fn last_epoch(&self) -> usize {
        self.last_epoch
    }
}
