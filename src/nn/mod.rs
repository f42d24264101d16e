//! Neural network building blocks for relational graph attention.
//!
//! The nn module is organized around the [`Module`] trait, which exposes
//! the named parameters and buffers of every layer:
//!
//! - **Graph attention**: [`gnn::EdgeGatConv`], [`gnn::GatStack`]
//! - **Layers**: [`Linear`]
//! - **Normalization**: [`BatchNorm1d`]
//! - **Functional**: [`functional`] (`relu`, `leaky_relu`, `dropout`)
//! - **Training**: [`optim`] (SGD over parameter groups), [`scheduler`]
//!
//! Forward passes compute values only. Gradients come from an external
//! differentiation engine and are attached with
//! [`Tensor::set_grad`](crate::tensor::Tensor::set_grad) before
//! an optimizer step.
//!
//! # Example
//!
//! ```
//! use relgat::nn::gnn::{EdgeIndex, GatStack, GatStackConfig};
//! use relgat::nn::Module;
//! use relgat::tensor::Tensor;
//! use relgat::train::seeded_rng;
//!
//! let config = GatStackConfig::new(4, 4, 3, 2, 2).with_heads(2);
//! let mut stack = GatStack::with_seed(config, Some(7)).unwrap();
//! stack.eval();
//!
//! let x = Tensor::ones(&[3, 4]);
//! let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 2]]);
//! let edge_attr = Tensor::ones(&[2, 3]);
//! let instructions = Tensor::zeros(&[2, 1, 2]);
//! let mut rng = seeded_rng(0);
//!
//! let out = stack
//!     .forward(&x, &edges, &edge_attr, &instructions, &[0, 0, 0], &mut rng)
//!     .unwrap();
//! assert_eq!(out.shape(), &[3, 4]);
//! ```
//!
//! # References
//!
//! - Veličković, P., et al. (2018). Graph Attention Networks. ICLR.
//! - Ioffe, S., & Szegedy, C. (2015). Batch Normalization. ICML.
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.

pub mod functional;
pub mod gnn;
mod init;
mod linear;
mod module;
mod normalization;
pub mod optim;
pub mod scheduler;

pub use functional as F;
pub use gnn::{
    AttentionWeights, EdgeGatConv, EdgeIndex, GatConfig, GatStack, GatStackConfig, NodeFeatures,
};
pub use init::glorot;
pub use linear::Linear;
pub use module::Module;
pub use normalization::BatchNorm1d;
pub use optim::{Optimizer, ParamGroup, SGD};
pub use scheduler::{LRScheduler, MultiStepLR};
