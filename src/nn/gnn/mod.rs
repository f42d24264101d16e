//! Graph attention layers conditioned on edge features and per-layer
//! instruction vectors.
//!
//! # Implemented Layers
//!
//! - [`EdgeGatConv`] - multi-head graph attention whose logits include a
//!   learned projection of edge features (Veličković et al., 2018, extended)
//! - [`GatStack`] - fixed-depth stack of [`EdgeGatConv`] layers, each
//!   re-conditioned on its own instruction vector, with residual connections,
//!   batch normalization, `ReLU`, and dropout between layers
//!
//! # Example
//!
//! ```
//! use relgat::nn::gnn::{EdgeGatConv, EdgeIndex, GatConfig};
//! use relgat::tensor::Tensor;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let conv = EdgeGatConv::new(GatConfig::new(4, 5, 3).with_heads(2), &mut rng).unwrap();
//!
//! let x = Tensor::ones(&[3, 4]);
//! let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 2]]);
//! let edge_attr = Tensor::ones(&[2, 3]);
//! let out = conv.forward(&x, &edges, &edge_attr, &mut rng).unwrap();
//! assert_eq!(out.shape(), &[3, 10]); // heads concatenated
//! ```
//!
//! # References
//!
//! - Veličković, P., et al. (2018). Graph Attention Networks. ICLR.
//! - Gilmer, J., et al. (2017). Neural Message Passing for Quantum Chemistry.
//!   ICML.

mod conv;
mod scatter;
mod stack;

pub use conv::{AttentionWeights, EdgeGatConv, GatConfig};
pub use scatter::{scatter_add, scatter_mean, scatter_softmax};
pub use stack::{broadcast_instructions, GatStack, GatStackConfig};

use crate::error::{RelGatError, Result};
use crate::tensor::Tensor;

/// Directed edge list in COO form.
///
/// Edge `k` runs from `src()[k]` to `tgt()[k]`; row `k` of an edge feature
/// matrix belongs to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EdgeIndex {
    /// Edge sources (COO format)
    src: Vec<usize>,
    /// Edge targets (COO format)
    tgt: Vec<usize>,
}

impl EdgeIndex {
    /// Create an edge list from `[source, target]` pairs.
    ///
    /// # Example
    /// ```
    /// use relgat::nn::gnn::EdgeIndex;
    ///
    /// let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 2], [2, 0]]);
    /// assert_eq!(edges.num_edges(), 3);
    /// assert_eq!(edges.tgt(), &[1, 2, 0]);
    /// ```
    #[must_use]
    pub fn from_pairs(edges: &[[usize; 2]]) -> Self {
        Self {
            src: edges.iter().map(|e| e[0]).collect(),
            tgt: edges.iter().map(|e| e[1]).collect(),
        }
    }

    /// Create an edge list from separate source and target vectors.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the vectors differ in length.
    pub fn from_coo(src: Vec<usize>, tgt: Vec<usize>) -> Result<Self> {
        if src.len() != tgt.len() {
            return Err(RelGatError::dimension_mismatch(
                "edge targets",
                src.len(),
                tgt.len(),
            ));
        }
        Ok(Self { src, tgt })
    }

    /// Create an edge list from a flat row-major `[2, E]` buffer.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `shape` is not `[2, E]` or the buffer length
    /// disagrees with it.
    pub fn try_from_flat(data: &[usize], shape: &[usize]) -> Result<Self> {
        let num_edges = match shape {
            &[2, e] => e,
            other => {
                return Err(RelGatError::ShapeMismatch {
                    expected: "edge_index of shape [2, E]".to_string(),
                    actual: format!("{other:?}"),
                })
            }
        };
        if data.len() != 2 * num_edges {
            return Err(RelGatError::dimension_mismatch(
                "edge_index elements",
                2 * num_edges,
                data.len(),
            ));
        }
        Ok(Self {
            src: data[..num_edges].to_vec(),
            tgt: data[num_edges..].to_vec(),
        })
    }

    /// Get number of edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Get edge sources.
    #[must_use]
    pub fn src(&self) -> &[usize] {
        &self.src
    }

    /// Get edge targets.
    #[must_use]
    pub fn tgt(&self) -> &[usize] {
        &self.tgt
    }

    /// Iterate over `(source, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.src.iter().copied().zip(self.tgt.iter().copied())
    }

    /// Check that every source is below `num_src` and every target below
    /// `num_tgt`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEdgeIndex` naming the first offending edge.
    pub fn validate(&self, num_src: usize, num_tgt: usize) -> Result<()> {
        for (edge, (s, t)) in self.iter().enumerate() {
            if s >= num_src {
                return Err(RelGatError::InvalidEdgeIndex {
                    edge,
                    node: s,
                    num_nodes: num_src,
                });
            }
            if t >= num_tgt {
                return Err(RelGatError::InvalidEdgeIndex {
                    edge,
                    node: t,
                    num_nodes: num_tgt,
                });
            }
        }
        Ok(())
    }

    /// Whether any edge connects a node to itself.
    #[must_use]
    pub fn has_self_loops(&self) -> bool {
        self.iter().any(|(s, t)| s == t)
    }

    /// Positions of the edges that are not self-loops, in order.
    pub(crate) fn non_loop_positions(&self) -> Vec<usize> {
        self.iter()
            .enumerate()
            .filter(|(_, (s, t))| s != t)
            .map(|(k, _)| k)
            .collect()
    }

    /// Copy of the edge list without self-loops.
    #[must_use]
    pub fn remove_self_loops(&self) -> Self {
        let (src, tgt) = self.iter().filter(|(s, t)| s != t).unzip();
        Self { src, tgt }
    }

    /// Remove existing self-loops, then append exactly one loop per node
    /// `0..num_nodes`.
    ///
    /// The appended loops occupy the last `num_nodes` positions.
    ///
    /// # Example
    /// ```
    /// use relgat::nn::gnn::EdgeIndex;
    ///
    /// let edges = EdgeIndex::from_pairs(&[[0, 1], [1, 1]]).with_self_loops(2);
    /// assert_eq!(edges.src(), &[0, 0, 1]);
    /// assert_eq!(edges.tgt(), &[1, 0, 1]);
    /// ```
    #[must_use]
    pub fn with_self_loops(&self, num_nodes: usize) -> Self {
        let mut out = self.remove_self_loops();
        out.src.extend(0..num_nodes);
        out.tgt.extend(0..num_nodes);
        out
    }

    /// Number of incoming edges per target node.
    #[must_use]
    pub fn in_degrees(&self, num_nodes: usize) -> Vec<usize> {
        let mut deg = vec![0; num_nodes];
        for &t in &self.tgt {
            if t < num_nodes {
                deg[t] += 1;
            }
        }
        deg
    }
}

/// Node features handed to an attention layer.
///
/// `Single` is the homogeneous case: the same nodes act as sources and
/// targets. `Pair` covers bipartite message passing; when `target` is `None`
/// the target-side attention term is dropped and targets are indexed like
/// sources.
#[derive(Debug, Clone, Copy)]
pub enum NodeFeatures<'a> {
    /// Homogeneous graph, `[N, F_in]`
    Single(&'a Tensor),
    /// Bipartite graph with source `[N_src, F_src]` and optional target
    /// `[N_tgt, F_tgt]` features
    Pair {
        source: &'a Tensor,
        target: Option<&'a Tensor>,
    },
}

impl<'a> NodeFeatures<'a> {
    /// Bipartite features with both sides present.
    #[must_use]
    pub fn pair(source: &'a Tensor, target: &'a Tensor) -> Self {
        Self::Pair {
            source,
            target: Some(target),
        }
    }

    #[must_use]
    pub fn source(&self) -> &'a Tensor {
        match *self {
            Self::Single(x) => x,
            Self::Pair { source, .. } => source,
        }
    }

    /// Target-side features, if distinct from the source side.
    #[must_use]
    pub fn target(&self) -> Option<&'a Tensor> {
        match *self {
            Self::Single(_) => None,
            Self::Pair { target, .. } => target,
        }
    }

    /// Number of nodes that receive messages.
    #[must_use]
    pub fn num_targets(&self) -> usize {
        self.target().unwrap_or(self.source()).rows()
    }
}

impl<'a> From<&'a Tensor> for NodeFeatures<'a> {
    fn from(x: &'a Tensor) -> Self {
        Self::Single(x)
    }
}

impl<'a> From<(&'a Tensor, &'a Tensor)> for NodeFeatures<'a> {
    fn from((source, target): (&'a Tensor, &'a Tensor)) -> Self {
        Self::pair(source, target)
    }
}
