//! Dense-index scatter reductions over edge-aligned rows.
//!
//! Every function takes `src: [E, F]` plus an `index` of length `E` naming the
//! segment (target node) each row belongs to, and reduces into
//! `num_segments` rows. Segments that receive no rows produce zeros.

use crate::error::{RelGatError, Result};
use crate::tensor::Tensor;

/// Added to softmax denominators so empty or underflowing groups stay finite.
const SOFTMAX_EPS: f32 = 1e-16;

fn check_index(src: &Tensor, index: &[usize], num_segments: usize) -> Result<(usize, usize)> {
    let (rows, cols) = src.dims2("scatter source")?;
    if index.len() != rows {
        return Err(RelGatError::dimension_mismatch("scatter index length", rows, index.len()));
    }
    if let Some((edge, &node)) = index.iter().enumerate().find(|&(_, &i)| i >= num_segments) {
        return Err(RelGatError::InvalidEdgeIndex {
            edge,
            node,
            num_nodes: num_segments,
        });
    }
    Ok((rows, cols))
}

/// Sum rows into their segments: `out[index[e]] += src[e]`.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `src` is not rank 2 or `index` has the wrong
/// length, and `InvalidEdgeIndex` if an index is out of range.
pub fn scatter_add(src: &Tensor, index: &[usize], num_segments: usize) -> Result<Tensor> {
    let (_, cols) = check_index(src, index, num_segments)?;
    let mut out = vec![0.0f32; num_segments * cols];
    for (e, &seg) in index.iter().enumerate() {
        let dst = &mut out[seg * cols..(seg + 1) * cols];
        for (o, &v) in dst.iter_mut().zip(src.row(e)) {
            *o += v;
        }
    }
    Tensor::from_vec(out, &[num_segments, cols])
}

/// Average rows per segment. Empty segments are zero.
///
/// # Errors
///
/// Same conditions as [`scatter_add`].
pub fn scatter_mean(src: &Tensor, index: &[usize], num_segments: usize) -> Result<Tensor> {
    let mut sum = scatter_add(src, index, num_segments)?;
    let mut counts = vec![0usize; num_segments];
    for &seg in index {
        counts[seg] += 1;
    }
    let cols = sum.cols();
    for (seg, &count) in counts.iter().enumerate() {
        if count > 1 {
            let inv = 1.0 / count as f32;
            for v in &mut sum.data_mut()[seg * cols..(seg + 1) * cols] {
                *v *= inv;
            }
        }
    }
    Ok(sum)
}

/// Softmax over the rows of each segment, independently per column.
///
/// Logits are shifted by their segment maximum before exponentiation, so
/// large logits do not overflow. The result has the shape of `src` and sums
/// to one over every non-empty segment, per column.
///
/// # Errors
///
/// Same conditions as [`scatter_add`].
///
/// # Example
///
/// ```
/// use relgat::nn::gnn::scatter_softmax;
/// use relgat::tensor::Tensor;
///
/// // two rows into segment 0, one row into segment 1
/// let logits = Tensor::new(&[1.0, 1.0, 5.0], &[3, 1]);
/// let alpha = scatter_softmax(&logits, &[0, 0, 1], 2).unwrap();
/// assert!((alpha.data()[0] - 0.5).abs() < 1e-6);
/// assert!((alpha.data()[2] - 1.0).abs() < 1e-6);
/// ```
pub fn scatter_softmax(src: &Tensor, index: &[usize], num_segments: usize) -> Result<Tensor> {
    let (rows, cols) = check_index(src, index, num_segments)?;
    let data = src.data();

    let mut max = vec![f32::NEG_INFINITY; num_segments * cols];
    for (e, &seg) in index.iter().enumerate() {
        for c in 0..cols {
            let m = &mut max[seg * cols + c];
            *m = m.max(data[e * cols + c]);
        }
    }

    let mut out = vec![0.0f32; rows * cols];
    let mut denom = vec![0.0f32; num_segments * cols];
    for (e, &seg) in index.iter().enumerate() {
        for c in 0..cols {
            let v = (data[e * cols + c] - max[seg * cols + c]).exp();
            out[e * cols + c] = v;
            denom[seg * cols + c] += v;
        }
    }

    for (e, &seg) in index.iter().enumerate() {
        for c in 0..cols {
            out[e * cols + c] /= denom[seg * cols + c] + SOFTMAX_EPS;
        }
    }
    Tensor::from_vec(out, &[rows, cols])
}
