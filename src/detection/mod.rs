//! Detection-side records and relation post-processing.
//!
//! Boxes are `[x1, y1, x2, y2]` rows. Non-maximum suppression is left to the
//! detector; [`filter_dets`] only scores and orders relation candidates.

use crate::error::{RelGatError, Result};
use crate::tensor::Tensor;

/// Relation candidates ranked by [`filter_dets`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRelations {
    /// `[B, 4]` boxes, unchanged.
    pub boxes: Tensor,
    /// Object class per box, unchanged.
    pub obj_classes: Vec<usize>,
    /// Object score per box, unchanged.
    pub obj_scores: Vec<f32>,
    /// `(subject, object)` box pairs, best relation first.
    pub rels: Vec<[usize; 2]>,
    /// `[R, P]` predicate scores reordered like `rels`.
    pub pred_scores: Tensor,
    /// Best non-background predicate column per relation (1-based, column 0
    /// is background).
    pub predicates: Vec<usize>,
    /// `max_p pred[p] * score(subject) * score(object)`, descending.
    pub rel_scores: Vec<f32>,
}

/// Score and sort relation candidates.
///
/// A relation's score is its best non-background predicate score times the
/// scores of both boxes. Relations are returned in descending score order
/// (ties keep input order).
///
/// # Errors
///
/// Returns `ShapeMismatch` if `boxes` is not `[B, 4]`, the per-box inputs do
/// not have `B` entries, or `pred_scores` is not `[R, P]` with `P >= 2`, and
/// `InvalidEdgeIndex` if a relation references a missing box.
pub fn filter_dets(
    boxes: &Tensor,
    obj_scores: &[f32],
    obj_classes: &[usize],
    rel_inds: &[[usize; 2]],
    pred_scores: &Tensor,
) -> Result<FilteredRelations> {
    let (num_box, box_dim) = boxes.dims2("boxes")?;
    if box_dim != 4 {
        return Err(RelGatError::shape_mismatch("boxes", &[num_box, 4], boxes.shape()));
    }
    if obj_scores.len() != num_box {
        return Err(RelGatError::dimension_mismatch("obj_scores", num_box, obj_scores.len()));
    }
    if obj_classes.len() != num_box {
        return Err(RelGatError::dimension_mismatch("obj_classes", num_box, obj_classes.len()));
    }
    let (num_rel, num_pred) = pred_scores.dims2("pred_scores")?;
    if num_rel != rel_inds.len() {
        return Err(RelGatError::dimension_mismatch("pred_scores rows", rel_inds.len(), num_rel));
    }
    if num_pred < 2 {
        return Err(RelGatError::dimension_mismatch("predicate columns (min)", 2, num_pred));
    }
    for (edge, pair) in rel_inds.iter().enumerate() {
        if let Some(&node) = pair.iter().find(|&&n| n >= num_box) {
            return Err(RelGatError::InvalidEdgeIndex {
                edge,
                node,
                num_nodes: num_box,
            });
        }
    }

    let mut scored: Vec<(usize, usize, f32)> = rel_inds
        .iter()
        .enumerate()
        .map(|(r, &[s, o])| {
            let row = &pred_scores.row(r)[1..];
            let (best, max) = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (p, &v)| if v > acc.1 { (p, v) } else { acc });
            (r, best + 1, max * obj_scores[s] * obj_scores[o])
        })
        .collect();
    scored.sort_by(|a, b| b.2.total_cmp(&a.2));

    let order: Vec<usize> = scored.iter().map(|&(r, _, _)| r).collect();
    Ok(FilteredRelations {
        boxes: boxes.detach(),
        obj_classes: obj_classes.to_vec(),
        obj_scores: obj_scores.to_vec(),
        rels: order.iter().map(|&r| rel_inds[r]).collect(),
        pred_scores: pred_scores.index_select_rows(&order)?,
        predicates: scored.iter().map(|&(_, p, _)| p).collect(),
        rel_scores: scored.iter().map(|&(_, _, s)| s).collect(),
    })
}

fn box_area(b: &[f32]) -> f32 {
    (b[2] - b[0]) * (b[3] - b[1])
}

/// Pairwise intersection-over-union of two box sets, `[n, m]`.
///
/// A pair whose union is empty has IoU 0.
///
/// # Errors
///
/// Returns `ShapeMismatch` if either input is not `[_, 4]`.
pub fn bbox_overlaps(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (n, da) = a.dims2("boxes1")?;
    let (m, db) = b.dims2("boxes2")?;
    if da != 4 || db != 4 {
        return Err(RelGatError::ShapeMismatch {
            expected: "[n, 4] and [m, 4] boxes".to_string(),
            actual: format!("{:?} and {:?}", a.shape(), b.shape()),
        });
    }

    let mut out = Vec::with_capacity(n * m);
    for i in 0..n {
        let p = a.row(i);
        for j in 0..m {
            let q = b.row(j);
            let w = (p[2].min(q[2]) - p[0].max(q[0])).max(0.0);
            let h = (p[3].min(q[3]) - p[1].max(q[1])).max(0.0);
            let inter = w * h;
            let union = box_area(p) + box_area(q) - inter;
            out.push(if union > 0.0 { inter / union } else { 0.0 });
        }
    }
    Tensor::from_vec(out, &[n, m])
}

/// Everything a scene-graph model may produce for a batch.
///
/// `od_*` fields come from the object detector, `rm_*` from the relation
/// model. Every field is optional; absent outputs stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneGraphOutputs {
    pub od_obj_dists: Option<Tensor>,
    pub rm_obj_dists: Option<Tensor>,
    pub obj_scores: Option<Tensor>,
    pub obj_preds: Option<Tensor>,
    pub obj_fmap: Option<Tensor>,
    pub od_box_deltas: Option<Tensor>,
    pub rm_box_deltas: Option<Tensor>,
    pub od_box_targets: Option<Tensor>,
    pub rm_box_targets: Option<Tensor>,
    pub od_box_priors: Option<Tensor>,
    pub rm_box_priors: Option<Tensor>,
    pub boxes_assigned: Option<Tensor>,
    pub boxes_all: Option<Tensor>,
    pub od_obj_labels: Option<Tensor>,
    pub rm_obj_labels: Option<Tensor>,
    pub rpn_scores: Option<Tensor>,
    pub rpn_box_deltas: Option<Tensor>,
    pub rel_labels: Option<Tensor>,
    pub rel_labels_all: Option<Tensor>,
    pub im_inds: Option<Tensor>,
    pub fmap: Option<Tensor>,
    pub rel_dists: Option<Tensor>,
    pub rel_inds: Option<Tensor>,
    pub rel_rep: Option<Tensor>,
}

impl SceneGraphOutputs {
    fn fields(&self) -> [(&'static str, Option<&Tensor>); 24] {
        [
            ("boxes_all", self.boxes_all.as_ref()),
            ("boxes_assigned", self.boxes_assigned.as_ref()),
            ("fmap", self.fmap.as_ref()),
            ("im_inds", self.im_inds.as_ref()),
            ("obj_fmap", self.obj_fmap.as_ref()),
            ("obj_preds", self.obj_preds.as_ref()),
            ("obj_scores", self.obj_scores.as_ref()),
            ("od_box_deltas", self.od_box_deltas.as_ref()),
            ("od_box_priors", self.od_box_priors.as_ref()),
            ("od_box_targets", self.od_box_targets.as_ref()),
            ("od_obj_dists", self.od_obj_dists.as_ref()),
            ("od_obj_labels", self.od_obj_labels.as_ref()),
            ("rel_dists", self.rel_dists.as_ref()),
            ("rel_inds", self.rel_inds.as_ref()),
            ("rel_labels", self.rel_labels.as_ref()),
            ("rel_labels_all", self.rel_labels_all.as_ref()),
            ("rel_rep", self.rel_rep.as_ref()),
            ("rm_box_deltas", self.rm_box_deltas.as_ref()),
            ("rm_box_priors", self.rm_box_priors.as_ref()),
            ("rm_box_targets", self.rm_box_targets.as_ref()),
            ("rm_obj_dists", self.rm_obj_dists.as_ref()),
            ("rm_obj_labels", self.rm_obj_labels.as_ref()),
            ("rpn_box_deltas", self.rpn_box_deltas.as_ref()),
            ("rpn_scores", self.rpn_scores.as_ref()),
        ]
    }

    /// Whether no output is set.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.fields().iter().all(|(_, t)| t.is_none())
    }

    /// Names of the set outputs, in alphabetical order.
    #[must_use]
    pub fn present_fields(&self) -> Vec<&'static str> {
        self.fields()
            .iter()
            .filter(|(_, t)| t.is_some())
            .map(|&(name, _)| name)
            .collect()
    }

    /// Output by field name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.fields()
            .into_iter()
            .find(|&(n, _)| n == name)
            .and_then(|(_, t)| t)
    }
}
