//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use relgat::prelude::*;
//! ```

pub use crate::checkpoint::{
    load_checkpoint, optimistic_restore, save_checkpoint, state_dict, Checkpoint, RestoreOptions,
    RestoreReport,
};
pub use crate::clip::{clip_grad_norm, grad_clip};
pub use crate::error::{RelGatError, Result};
pub use crate::nn::gnn::{
    EdgeGatConv, EdgeIndex, GatConfig, GatStack, GatStackConfig, NodeFeatures,
};
pub use crate::nn::optim::build_optimizer;
pub use crate::nn::{LRScheduler, Module, MultiStepLR, Optimizer, SGD};
pub use crate::tensor::Tensor;
pub use crate::train::{seeded_rng, set_mode, TrainConfig};
