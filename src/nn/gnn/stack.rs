//! Instruction-conditioned stack of edge attention layers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::conv::{EdgeGatConv, GatConfig};
use super::{EdgeIndex, NodeFeatures};
use crate::error::{RelGatError, Result};
use crate::nn::functional::{dropout, relu};
use crate::nn::module::{prefixed, Module};
use crate::nn::normalization::BatchNorm1d;
use crate::tensor::Tensor;

/// Hyperparameters of a [`GatStack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatStackConfig {
    /// Node feature width; must equal `out_channels` for the residual
    pub in_channels: usize,
    /// Hidden and output width
    pub out_channels: usize,
    /// Raw edge feature width
    pub edge_attr_dim: usize,
    /// Instruction vector width
    pub ins_dim: usize,
    /// Number of attention layers (one instruction per layer)
    pub num_layers: usize,
    /// Dropout on attention weights and between layers
    pub dropout: f32,
    /// Attention heads per layer
    pub heads: usize,
    /// Negative slope for `LeakyReLU`
    pub negative_slope: f32,
    /// Learn an additive bias in each attention layer
    pub bias: bool,
    /// Add self-loops in each attention layer
    pub add_self_loops: bool,
}

impl Default for GatStackConfig {
    fn default() -> Self {
        Self {
            in_channels: 64,
            out_channels: 64,
            edge_attr_dim: 64,
            ins_dim: 64,
            num_layers: 5,
            dropout: 0.0,
            heads: 4,
            negative_slope: 0.2,
            bias: true,
            add_self_loops: true,
        }
    }
}

impl GatStackConfig {
    /// Create a configuration with four heads, slope 0.2, bias, self-loops
    /// and no dropout.
    #[must_use]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        edge_attr_dim: usize,
        ins_dim: usize,
        num_layers: usize,
    ) -> Self {
        Self {
            in_channels,
            out_channels,
            edge_attr_dim,
            ins_dim,
            num_layers,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    #[must_use]
    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    #[must_use]
    pub fn with_negative_slope(mut self, negative_slope: f32) -> Self {
        self.negative_slope = negative_slope;
        self
    }

    /// Disable bias in every layer.
    #[must_use]
    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }

    /// Disable self-loops in every layer.
    #[must_use]
    pub fn without_self_loops(mut self) -> Self {
        self.add_self_loops = false;
        self
    }

    /// Configuration of each attention layer: node and edge inputs are widened
    /// by the instruction width and heads are averaged.
    #[must_use]
    pub fn layer_config(&self) -> GatConfig {
        let mut config = GatConfig::new(
            self.in_channels + self.ins_dim,
            self.out_channels,
            self.edge_attr_dim + self.ins_dim,
        )
        .with_heads(self.heads)
        .with_concat(false)
        .with_negative_slope(self.negative_slope)
        .with_dropout(self.dropout);
        if !self.bias {
            config = config.without_bias();
        }
        if !self.add_self_loops {
            config = config.without_self_loops();
        }
        config
    }

    /// Check that the stack can be built.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMismatch` when the residual is impossible
    /// (`in_channels != out_channels`) or there are no layers, and
    /// `InvalidHyperparameter` for out-of-range layer settings.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels != self.out_channels {
            return Err(RelGatError::ConfigurationMismatch(format!(
                "residual connection needs in_channels == out_channels, got {} and {}",
                self.in_channels, self.out_channels
            )));
        }
        if self.num_layers == 0 {
            return Err(RelGatError::ConfigurationMismatch(
                "stack needs at least one layer".to_string(),
            ));
        }
        self.layer_config().validate()
    }
}

/// Gather the instruction row of each item: `out[k] = instructions[index[k]]`.
///
/// Used with the batch vector to give every node the instruction of its graph,
/// and with the batch ids of edge sources to do the same for edges.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `instructions` is not rank 2 or an index is out
/// of range.
///
/// # Example
///
/// ```
/// use relgat::nn::gnn::broadcast_instructions;
/// use relgat::tensor::Tensor;
///
/// let ins = Tensor::new(&[1.0, 2.0], &[2, 1]);
/// let per_node = broadcast_instructions(&ins, &[0, 0, 1]).unwrap();
/// assert_eq!(per_node.data(), &[1.0, 1.0, 2.0]);
/// ```
pub fn broadcast_instructions(instructions: &Tensor, index: &[usize]) -> Result<Tensor> {
    instructions.index_select_rows(index)
}

/// Stack of [`EdgeGatConv`] layers, each conditioned on its own instruction.
///
/// Per layer `i`:
///
/// ```text
/// x_cat = [h ‖ ins_i[batch]]
/// e_cat = [edge_attr ‖ ins_i[batch[src]]]
/// h     = conv_i(x_cat, e_cat) + h
/// h     = dropout(relu(bn_i(h)))        // all but the last layer
/// ```
///
/// # Example
///
/// ```
/// use relgat::nn::gnn::{EdgeIndex, GatStack, GatStackConfig};
/// use relgat::tensor::Tensor;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let config = GatStackConfig::new(8, 8, 3, 2, 2);
/// let mut stack = GatStack::new(config, &mut rng).unwrap();
///
/// let x = Tensor::ones(&[4, 8]);
/// let edges = EdgeIndex::from_pairs(&[[0, 1], [2, 3]]);
/// let edge_attr = Tensor::ones(&[2, 3]);
/// let instructions = Tensor::ones(&[2, 2, 2]); // [layers, graphs, ins_dim]
/// let out = stack
///     .forward(&x, &edges, &edge_attr, &instructions, &[0, 0, 1, 1], &mut rng)
///     .unwrap();
/// assert_eq!(out.shape(), &[4, 8]);
/// ```
#[derive(Debug, Clone)]
pub struct GatStack {
    config: GatStackConfig,
    convs: Vec<EdgeGatConv>,
    /// One fewer than `convs`: the last layer is not normalized
    bns: Vec<BatchNorm1d>,
    training: bool,
}

impl GatStack {
    /// Build the stack with weights drawn from `rng`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMismatch` or `InvalidHyperparameter` if the
    /// configuration does not validate.
    pub fn new<R: Rng + ?Sized>(config: GatStackConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let layer = config.layer_config();
        let convs = (0..config.num_layers)
            .map(|_| EdgeGatConv::new(layer.clone(), rng))
            .collect::<Result<Vec<_>>>()?;
        let bns = (1..config.num_layers)
            .map(|_| BatchNorm1d::new(config.out_channels))
            .collect();
        Ok(Self {
            config,
            convs,
            bns,
            training: true,
        })
    }

    /// Build the stack from a seed (`None` draws one from the OS).
    ///
    /// # Errors
    ///
    /// Same conditions as [`GatStack::new`].
    pub fn with_seed(config: GatStackConfig, seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self::new(config, &mut rng)
    }

    #[must_use]
    pub fn config(&self) -> &GatStackConfig {
        &self.config
    }

    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.convs.len()
    }

    #[must_use]
    pub fn convs(&self) -> &[EdgeGatConv] {
        &self.convs
    }

    #[must_use]
    pub fn bns(&self) -> &[BatchNorm1d] {
        &self.bns
    }

    /// Run every layer and return the last hidden state `[N, out_channels]`.
    ///
    /// # Arguments
    ///
    /// * `x` - Node features `[N, in_channels]`
    /// * `edge_index` - Directed edges over the `N` nodes
    /// * `edge_attr` - Edge features `[E, edge_attr_dim]`
    /// * `instructions` - `[num_layers, B, ins_dim]`
    /// * `batch` - Graph id of each node, length `N`, values below `B`
    /// * `rng` - Randomness for attention and inter-layer dropout
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMismatch` if the number of instructions differs
    /// from the number of layers, `ShapeMismatch` for width or batch problems,
    /// and `InvalidEdgeIndex` for out-of-range edges.
    pub fn forward<R: Rng + ?Sized>(
        &mut self,
        x: &Tensor,
        edge_index: &EdgeIndex,
        edge_attr: &Tensor,
        instructions: &Tensor,
        batch: &[usize],
        rng: &mut R,
    ) -> Result<Tensor> {
        let (num_nodes, width) = x.dims2("node features")?;
        if width != self.config.in_channels {
            return Err(RelGatError::dimension_mismatch(
                "in_channels",
                self.config.in_channels,
                width,
            ));
        }
        let &[num_ins, _, ins_dim] = instructions.shape() else {
            return Err(RelGatError::rank_mismatch("instructions", 3, instructions.shape()));
        };
        if num_ins != self.convs.len() {
            return Err(RelGatError::ConfigurationMismatch(format!(
                "{} layers but {} instruction sets",
                self.convs.len(),
                num_ins
            )));
        }
        if ins_dim != self.config.ins_dim {
            return Err(RelGatError::dimension_mismatch(
                "ins_dim",
                self.config.ins_dim,
                ins_dim,
            ));
        }
        if batch.len() != num_nodes {
            return Err(RelGatError::dimension_mismatch("batch length", num_nodes, batch.len()));
        }
        edge_index.validate(num_nodes, num_nodes)?;
        let edge_batch: Vec<usize> = edge_index.src().iter().map(|&s| batch[s]).collect();

        let last = self.convs.len() - 1;
        let mut h = x.detach();
        for (i, conv) in self.convs.iter().enumerate() {
            let ins = instructions.select_first(i)?;
            let edge_cat = edge_attr.cat_cols(&broadcast_instructions(&ins, &edge_batch)?)?;
            let x_cat = h.cat_cols(&broadcast_instructions(&ins, batch)?)?;

            let conv_out = conv.forward(NodeFeatures::Single(&x_cat), edge_index, &edge_cat, rng)?;
            h = conv_out.add(&h)?;

            if i != last {
                h = self.bns[i].forward(&h)?;
                h = relu(&h);
                h = dropout(&h, self.config.dropout, self.training, rng);
            }
            debug!(layer = i, shape = ?h.shape(), "gat stack layer");
        }
        Ok(h)
    }
}

impl Module for GatStack {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = Vec::new();
        for (i, conv) in self.convs.iter().enumerate() {
            for (name, p) in conv.named_parameters() {
                params.push((prefixed(&format!("convs.{i}"), &name), p));
            }
        }
        for (i, bn) in self.bns.iter().enumerate() {
            for (name, p) in bn.named_parameters() {
                params.push((prefixed(&format!("bns.{i}"), &name), p));
            }
        }
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = Vec::new();
        for (i, conv) in self.convs.iter_mut().enumerate() {
            for (name, p) in conv.named_parameters_mut() {
                params.push((prefixed(&format!("convs.{i}"), &name), p));
            }
        }
        for (i, bn) in self.bns.iter_mut().enumerate() {
            for (name, p) in bn.named_parameters_mut() {
                params.push((prefixed(&format!("bns.{i}"), &name), p));
            }
        }
        params
    }

    fn named_buffers(&self) -> Vec<(String, &Tensor)> {
        let mut buffers = Vec::new();
        for (i, bn) in self.bns.iter().enumerate() {
            for (name, b) in bn.named_buffers() {
                buffers.push((prefixed(&format!("bns.{i}"), &name), b));
            }
        }
        buffers
    }

    fn named_buffers_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut buffers = Vec::new();
        for (i, bn) in self.bns.iter_mut().enumerate() {
            for (name, b) in bn.named_buffers_mut() {
                buffers.push((prefixed(&format!("bns.{i}"), &name), b));
            }
        }
        buffers
    }

    fn train(&mut self) {
        self.training = true;
        self.convs.iter_mut().for_each(|conv| conv.train());
        self.bns.iter_mut().for_each(|bn| bn.train());
    }

    fn eval(&mut self) {
        self.training = false;
        self.convs.iter_mut().for_each(|conv| conv.eval());
        self.bns.iter_mut().for_each(|bn| bn.eval());
    }

    fn training(&self) -> bool {
        self.training
    }
}
