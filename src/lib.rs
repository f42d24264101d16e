//! Relgat: edge- and instruction-conditioned graph attention for scene-graph
//! generation, in pure Rust.
//!
//! Relgat provides a graph-attention layer whose attention logits and
//! messages are conditioned on per-edge features, a residual stack of those
//! layers that re-injects a per-layer instruction vector at every depth, and
//! the training utilities around them.
//!
//! # Quick Start
//!
//! ```
//! use relgat::prelude::*;
//!
//! // 3 nodes, 2 directed edges, 3-dim edge features
//! let x = Tensor::ones(&[3, 4]);
//! let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 2]]);
//! let edge_attr = Tensor::ones(&[2, 3]);
//!
//! let config = GatConfig::new(4, 5, 3).with_heads(2).with_concat(false);
//! let conv = EdgeGatConv::with_seed(config, Some(42)).unwrap();
//! let mut rng = seeded_rng(0);
//!
//! let (out, attention) = conv
//!     .forward_with_attention(&x, &edges, &edge_attr, &mut rng)
//!     .unwrap();
//! assert_eq!(out.shape(), &[3, 5]);
//! // two edges plus one self-loop per node
//! assert_eq!(attention.weights.shape(), &[5, 2]);
//! ```
//!
//! # Modules
//!
//! - [`tensor`]: Dense row-major `f32` tensor with a gradient slot
//! - [`nn`]: Attention layer, layer stack, normalization, optimizer, scheduler
//! - [`checkpoint`]: State dicts, checkpoint files, key-tolerant restore
//! - [`serialization`]: `SafeTensors` container
//! - [`clip`]: Global gradient-norm clipping
//! - [`ops`]: Index and reshaping helpers
//! - [`detection`]: Relation post-processing and the model output record
//! - [`train`]: Training configuration, seeding, mode switching

pub mod checkpoint;
pub mod clip;
pub mod detection;
pub mod error;
pub mod nn;
pub mod ops;
pub mod prelude;
pub mod serialization;
pub mod tensor;
pub mod train;

pub use error::{RelGatError, Result};
