//! Edge-conditioned graph attention layer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scatter::{scatter_mean, scatter_softmax};
use super::{EdgeIndex, NodeFeatures};
use crate::error::{RelGatError, Result};
use crate::nn::functional::{dropout_in_place, leaky_relu_scalar};
use crate::nn::init::{glorot, zeros};
use crate::nn::linear::Linear;
use crate::nn::module::{prefixed, Module};
use crate::tensor::Tensor;

/// Hyperparameters of one [`EdgeGatConv`] layer.
///
/// # Example
///
/// ```
/// use relgat::nn::gnn::GatConfig;
///
/// let config = GatConfig::new(16, 8, 4).with_heads(4).with_concat(false);
/// assert_eq!(config.output_dim(), 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatConfig {
    /// Source node feature width
    pub in_channels: usize,
    /// Target node feature width for bipartite input; `None` shares the source
    /// projection
    #[serde(default)]
    pub target_in_channels: Option<usize>,
    /// Output width per head
    pub out_channels: usize,
    /// Edge feature width
    pub edge_in_channels: usize,
    /// Number of attention heads
    pub heads: usize,
    /// Concatenate heads (true) or average them (false)
    pub concat: bool,
    /// Negative slope for `LeakyReLU`
    pub negative_slope: f32,
    /// Dropout probability on attention weights
    pub dropout: f32,
    /// Add one self-loop per node before attending
    pub add_self_loops: bool,
    /// Learn an additive output bias
    pub bias: bool,
}

impl GatConfig {
    /// Single-head configuration with concatenation, self-loops, bias, slope
    /// 0.2 and no dropout.
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize, edge_in_channels: usize) -> Self {
        Self {
            in_channels,
            target_in_channels: None,
            out_channels,
            edge_in_channels,
            heads: 1,
            concat: true,
            negative_slope: 0.2,
            dropout: 0.0,
            add_self_loops: true,
            bias: true,
        }
    }

    #[must_use]
    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    #[must_use]
    pub fn with_concat(mut self, concat: bool) -> Self {
        self.concat = concat;
        self
    }

    #[must_use]
    pub fn with_negative_slope(mut self, negative_slope: f32) -> Self {
        self.negative_slope = negative_slope;
        self
    }

    #[must_use]
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Use a separate target projection of width `target_in_channels`.
    #[must_use]
    pub fn with_bipartite(mut self, target_in_channels: usize) -> Self {
        self.target_in_channels = Some(target_in_channels);
        self
    }

    /// Disable self-loops.
    #[must_use]
    pub fn without_self_loops(mut self) -> Self {
        self.add_self_loops = false;
        self
    }

    /// Disable bias.
    #[must_use]
    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }

    /// Width of the layer output.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        if self.concat {
            self.heads * self.out_channels
        } else {
            self.out_channels
        }
    }

    /// Check hyperparameter ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` for zero widths or heads, a dropout
    /// outside `[0, 1)`, or a non-finite slope.
    pub fn validate(&self) -> Result<()> {
        for (param, value) in [
            ("in_channels", self.in_channels),
            ("out_channels", self.out_channels),
            ("heads", self.heads),
        ] {
            if value == 0 {
                return Err(RelGatError::invalid_hyperparameter(param, value, "> 0"));
            }
        }
        if self.target_in_channels == Some(0) {
            return Err(RelGatError::invalid_hyperparameter("target_in_channels", 0, "> 0"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(RelGatError::invalid_hyperparameter("dropout", self.dropout, "[0, 1)"));
        }
        if !self.negative_slope.is_finite() {
            return Err(RelGatError::invalid_hyperparameter(
                "negative_slope",
                self.negative_slope,
                "finite",
            ));
        }
        Ok(())
    }
}

/// Attention coefficients of one forward pass.
#[derive(Debug, Clone)]
pub struct AttentionWeights {
    /// Edge list the weights refer to, including appended self-loops
    pub edge_index: EdgeIndex,
    /// Normalized coefficients `[E', heads]`, before attention dropout
    pub weights: Tensor,
}

impl AttentionWeights {
    /// Sum of the coefficients arriving at each target node, per head:
    /// `[num_targets, heads]`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEdgeIndex` if a target is out of range.
    pub fn target_sums(&self, num_targets: usize) -> Result<Tensor> {
        super::scatter::scatter_add(&self.weights, self.edge_index.tgt(), num_targets)
    }
}

/// Graph attention layer whose logits and neighborhoods are conditioned on
/// edge features.
///
/// For edge `j → i` and head `h`:
///
/// ```text
/// e_ij  = LeakyReLU(a_l·W_l x_j + a_r·W_r x_i + a_e·W_e e_ji)
/// α_ij  = softmax over the incoming edges of i (e_ij)
/// x'_i  = Σ_j α_ij W_l x_j
/// ```
///
/// Heads are concatenated or averaged, then the bias is added. Node features
/// may be a single matrix or a bipartite pair (see [`NodeFeatures`]).
///
/// Nodes with no incoming edges (possible when self-loops are disabled)
/// receive a zero message, so their output is exactly the bias.
#[derive(Debug, Clone)]
pub struct EdgeGatConv {
    config: GatConfig,
    /// Source projection, also used for targets unless bipartite
    lin_l: Linear,
    /// Target projection for bipartite input
    lin_r: Option<Linear>,
    /// Edge feature projection
    lin_e: Linear,
    /// Attention vector for source nodes [heads, out_channels]
    att_l: Tensor,
    /// Attention vector for target nodes [heads, out_channels]
    att_r: Tensor,
    /// Attention vector for edges [heads, out_channels]
    att_e: Tensor,
    /// Bias [heads * out_channels] or [out_channels]
    bias: Option<Tensor>,
    training: bool,
}

impl EdgeGatConv {
    /// Create a layer with Glorot-initialized weights drawn from `rng` and a
    /// zero bias.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` if the configuration does not validate.
    pub fn new<R: Rng + ?Sized>(config: GatConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let (h, c) = (config.heads, config.out_channels);
        let hc = h * c;

        let lin_l = Linear::without_bias(config.in_channels, hc, rng);
        let lin_r = match config.target_in_channels {
            Some(t) => Some(Linear::without_bias(t, hc, rng)),
            None => None,
        };
        let lin_e = Linear::without_bias(config.edge_in_channels, hc, rng);
        let att_l = glorot(&[h, c], h, c, rng);
        let att_r = glorot(&[h, c], h, c, rng);
        let att_e = glorot(&[h, c], h, c, rng);
        let bias = config.bias.then(|| zeros(&[config.output_dim()]));

        Ok(Self {
            config,
            lin_l,
            lin_r,
            lin_e,
            att_l,
            att_r,
            att_e,
            bias,
            training: true,
        })
    }

    /// Create a layer from a seed (`None` draws one from the OS).
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` if the configuration does not validate.
    pub fn with_seed(config: GatConfig, seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self::new(config, &mut rng)
    }

    #[must_use]
    pub fn config(&self) -> &GatConfig {
        &self.config
    }

    #[must_use]
    pub fn heads(&self) -> usize {
        self.config.heads
    }

    /// Width of the layer output.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.config.output_dim()
    }

    #[must_use]
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Compute updated node features.
    ///
    /// `rng` drives attention dropout and is untouched in evaluation mode or
    /// when dropout is zero.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if feature widths disagree with the
    /// configuration or `edge_attr` is not `[E, edge_in_channels]`, and
    /// `InvalidEdgeIndex` if an edge endpoint is out of range.
    pub fn forward<'a, X, R>(
        &self,
        x: X,
        edge_index: &EdgeIndex,
        edge_attr: &Tensor,
        rng: &mut R,
    ) -> Result<Tensor>
    where
        X: Into<NodeFeatures<'a>>,
        R: Rng + ?Sized,
    {
        self.forward_with_attention(x, edge_index, edge_attr, rng)
            .map(|(out, _)| out)
    }

    /// Like [`forward`](Self::forward), also returning the attention
    /// coefficients and the edge list they belong to.
    ///
    /// # Errors
    ///
    /// Same conditions as [`forward`](Self::forward).
    pub fn forward_with_attention<'a, X, R>(
        &self,
        x: X,
        edge_index: &EdgeIndex,
        edge_attr: &Tensor,
        rng: &mut R,
    ) -> Result<(Tensor, AttentionWeights)>
    where
        X: Into<NodeFeatures<'a>>,
        R: Rng + ?Sized,
    {
        let x = x.into();
        let (h, c) = (self.config.heads, self.config.out_channels);
        let hc = h * c;

        let source = x.source();
        let (num_src, src_width) = source.dims2("source node features")?;
        if src_width != self.config.in_channels {
            return Err(RelGatError::dimension_mismatch(
                "in_channels",
                self.config.in_channels,
                src_width,
            ));
        }
        let (num_edges, edge_width) = edge_attr.dims2("edge features")?;
        if num_edges != edge_index.num_edges() {
            return Err(RelGatError::dimension_mismatch(
                "edge feature rows",
                edge_index.num_edges(),
                num_edges,
            ));
        }
        if edge_width != self.config.edge_in_channels {
            return Err(RelGatError::dimension_mismatch(
                "edge_in_channels",
                self.config.edge_in_channels,
                edge_width,
            ));
        }
        let num_tgt = x.num_targets();
        edge_index.validate(num_src, num_tgt)?;
        if !self.config.add_self_loops {
            let isolated = edge_index
                .in_degrees(num_tgt)
                .iter()
                .filter(|&&d| d == 0)
                .count();
            if isolated > 0 {
                debug!(isolated, "nodes without incoming edges receive only the bias");
            }
        }

        // Projections and per-node attention terms.
        let x_l = self.lin_l.forward(source)?;
        let alpha_l = head_dot(&x_l, &self.att_l, h, c);
        let alpha_r = match (x, x.target()) {
            (NodeFeatures::Single(_), _) => Some(head_dot(&x_l, &self.att_r, h, c)),
            (_, Some(target)) => {
                let x_r = self.project_target(target)?;
                Some(head_dot(&x_r, &self.att_r, h, c))
            }
            (_, None) => None,
        };

        let (edges, edge_attr) = if self.config.add_self_loops {
            with_mean_loop_attr(edge_index, edge_attr, num_src.min(num_tgt))?
        } else {
            (edge_index.clone(), edge_attr.detach())
        };
        let e = self.lin_e.forward(&edge_attr)?;
        let alpha_e = head_dot(&e, &self.att_e, h, c);

        let slope = self.config.negative_slope;
        let mut logits = vec![0.0f32; edges.num_edges() * h];
        for (k, (s, t)) in edges.iter().enumerate() {
            for head in 0..h {
                let mut v = alpha_l[s * h + head] + alpha_e[k * h + head];
                if let Some(ref ar) = alpha_r {
                    v += ar[t * h + head];
                }
                logits[k * h + head] = leaky_relu_scalar(v, slope);
            }
        }
        let logits = Tensor::from_vec(logits, &[edges.num_edges(), h])?;
        let alpha = scatter_softmax(&logits, edges.tgt(), num_tgt)?;

        let mut coeffs = alpha.data().to_vec();
        if self.training {
            dropout_in_place(&mut coeffs, self.config.dropout, rng);
        }

        // out[t, head, :] += α[k, head] * x_l[s, head, :]
        let mut messages = vec![0.0f32; num_tgt * hc];
        for (k, (s, t)) in edges.iter().enumerate() {
            let x_j = x_l.row(s);
            let dst = &mut messages[t * hc..(t + 1) * hc];
            for head in 0..h {
                let a = coeffs[k * h + head];
                if a == 0.0 {
                    continue;
                }
                for ch in 0..c {
                    dst[head * c + ch] += a * x_j[head * c + ch];
                }
            }
        }

        let width = self.output_dim();
        let mut out = if self.config.concat {
            messages
        } else {
            let inv = 1.0 / h as f32;
            let mut mean = vec![0.0f32; num_tgt * c];
            for (node, row) in messages.chunks(hc).enumerate() {
                for head in 0..h {
                    for ch in 0..c {
                        mean[node * c + ch] += row[head * c + ch] * inv;
                    }
                }
            }
            mean
        };
        if let Some(bias) = &self.bias {
            for row in out.chunks_mut(width) {
                for (o, &b) in row.iter_mut().zip(bias.data()) {
                    *o += b;
                }
            }
        }

        debug!(
            nodes = num_tgt,
            edges = edges.num_edges(),
            heads = h,
            width,
            "edge gat forward"
        );
        let out = Tensor::from_vec(out, &[num_tgt, width])?;
        Ok((
            out,
            AttentionWeights {
                edge_index: edges,
                weights: alpha,
            },
        ))
    }

    fn project_target(&self, target: &Tensor) -> Result<Tensor> {
        let lin = self.lin_r.as_ref().unwrap_or(&self.lin_l);
        let (_, width) = target.dims2("target node features")?;
        if width != lin.in_features() {
            return Err(RelGatError::dimension_mismatch(
                "target_in_channels",
                lin.in_features(),
                width,
            ));
        }
        lin.forward(target)
    }
}

/// Per-row, per-head dot product of `x: [n, heads * c]` with `att: [heads, c]`,
/// returned flat as `[n, heads]`.
fn head_dot(x: &Tensor, att: &Tensor, heads: usize, c: usize) -> Vec<f32> {
    let att = att.data();
    let mut out = Vec::with_capacity(x.rows() * heads);
    for row in x.data().chunks(heads * c) {
        for head in 0..heads {
            let range = head * c..(head + 1) * c;
            out.push(
                row[range.clone()]
                    .iter()
                    .zip(&att[range])
                    .map(|(a, b)| a * b)
                    .sum(),
            );
        }
    }
    out
}

/// Replace self-loops with one loop per node `0..num_loops`, whose features
/// are the mean of the node's incoming edge features (zero if it has none).
pub(super) fn with_mean_loop_attr(
    edge_index: &EdgeIndex,
    edge_attr: &Tensor,
    num_loops: usize,
) -> Result<(EdgeIndex, Tensor)> {
    let kept = edge_index.non_loop_positions();
    let kept_attr = edge_attr.index_select_rows(&kept)?;
    let kept_edges = edge_index.remove_self_loops();

    // Targets beyond num_loops (bipartite) do not get a loop; drop them from
    // the mean so the scatter stays in range.
    let (rows, targets): (Vec<usize>, Vec<usize>) = kept_edges
        .tgt()
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t < num_loops)
        .map(|(k, &t)| (k, t))
        .unzip();
    let loop_attr = scatter_mean(&kept_attr.index_select_rows(&rows)?, &targets, num_loops)?;

    let cols = edge_attr.cols();
    let mut data = kept_attr.into_vec();
    data.extend_from_slice(loop_attr.data());
    let attr = Tensor::from_vec(data, &[kept.len() + num_loops, cols])?;
    Ok((kept_edges.with_self_loops(num_loops), attr))
}

impl Module for EdgeGatConv {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = Vec::with_capacity(7);
        for (name, p) in self.lin_l.named_parameters() {
            params.push((prefixed("lin_l", &name), p));
        }
        if let Some(lin_r) = &self.lin_r {
            for (name, p) in lin_r.named_parameters() {
                params.push((prefixed("lin_r", &name), p));
            }
        }
        for (name, p) in self.lin_e.named_parameters() {
            params.push((prefixed("lin_e", &name), p));
        }
        params.push(("att_l".to_string(), &self.att_l));
        params.push(("att_r".to_string(), &self.att_r));
        params.push(("att_e".to_string(), &self.att_e));
        if let Some(bias) = &self.bias {
            params.push(("bias".to_string(), bias));
        }
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = Vec::with_capacity(7);
        for (name, p) in self.lin_l.named_parameters_mut() {
            params.push((prefixed("lin_l", &name), p));
        }
        if let Some(lin_r) = &mut self.lin_r {
            for (name, p) in lin_r.named_parameters_mut() {
                params.push((prefixed("lin_r", &name), p));
            }
        }
        for (name, p) in self.lin_e.named_parameters_mut() {
            params.push((prefixed("lin_e", &name), p));
        }
        params.push(("att_l".to_string(), &mut self.att_l));
        params.push(("att_r".to_string(), &mut self.att_r));
        params.push(("att_e".to_string(), &mut self.att_e));
        if let Some(bias) = &mut self.bias {
            params.push(("bias".to_string(), bias));
        }
        params
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
