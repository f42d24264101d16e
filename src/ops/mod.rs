//! Index bookkeeping helpers used around the relation model: per-image
//! ranges, packed-sequence permutations, rankings and small gathers.
//!
//! Index tensors are plain `usize` slices; value tensors are [`Tensor`]s.

use rand::seq::index::sample;
use rand::Rng;

use crate::error::{RelGatError, Result};
use crate::tensor::Tensor;

/// `[0, 1, ..., n - 1]`.
#[must_use]
pub fn arange(n: usize) -> Vec<usize> {
    (0..n).collect()
}

/// One-hot rows with `fill` at the label and `-fill` elsewhere.
///
/// # Errors
///
/// Returns `ShapeMismatch` if a label is not below `num_classes`.
///
/// # Example
///
/// ```
/// use relgat::ops::to_onehot;
///
/// let logits = to_onehot(&[2, 0], 3, 1000.0).unwrap();
/// assert_eq!(logits.row(0), &[-1000.0, -1000.0, 1000.0]);
/// ```
pub fn to_onehot(labels: &[usize], num_classes: usize, fill: f32) -> Result<Tensor> {
    let mut data = vec![-fill; labels.len() * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(RelGatError::dimension_mismatch(
                "label < num_classes",
                num_classes,
                label,
            ));
        }
        data[i * num_classes + label] = fill;
    }
    Tensor::from_vec(data, &[labels.len(), num_classes])
}

/// Gather the innermost vectors of `x` addressed by `index`.
///
/// `x` has shape `[x0, ..., x{n-1}, dim]` and every index row holds `n`
/// coordinates. The result has shape `[index.len(), dim]`.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `x` has rank below 2, an index row has the
/// wrong length, or a coordinate is out of range.
pub fn gather_nd(x: &Tensor, index: &[Vec<usize>]) -> Result<Tensor> {
    let shape = x.shape();
    if shape.len() < 2 {
        return Err(RelGatError::rank_mismatch("gather_nd input", 2, shape));
    }
    let nd = shape.len() - 1;
    let dim = shape[nd];

    let mut rows = Vec::with_capacity(index.len());
    for coords in index {
        if coords.len() != nd {
            return Err(RelGatError::dimension_mismatch(
                "gather_nd index width",
                nd,
                coords.len(),
            ));
        }
        let mut flat = 0;
        for (axis, (&c, &size)) in coords.iter().zip(&shape[..nd]).enumerate() {
            if c >= size {
                return Err(RelGatError::ShapeMismatch {
                    expected: format!("coordinate < {size} on axis {axis}"),
                    actual: c.to_string(),
                });
            }
            flat = flat * size + c;
        }
        rows.push(flat);
    }
    x.reshape(&[x.numel() / dim.max(1), dim])?
        .index_select_rows(&rows)
}

/// `(image, start, end)` for every run of equal ids in `im_inds`.
///
/// Runs are reported in order of appearance; an id that reappears later
/// starts a new run.
#[must_use]
pub fn enumerate_by_image(im_inds: &[usize]) -> Vec<(usize, usize, usize)> {
    let mut runs = Vec::new();
    let Some(&first) = im_inds.first() else {
        return runs;
    };
    let (mut current, mut start) = (first, 0);
    for (i, &id) in im_inds.iter().enumerate() {
        if id != current {
            runs.push((current, start, i));
            current = id;
            start = i;
        }
    }
    runs.push((current, start, im_inds.len()));
    runs
}

/// Flat offsets of the diagonal of the first two (equal) dimensions.
///
/// # Errors
///
/// Returns `ShapeMismatch` if the tensor has rank below 2 or the first two
/// dimensions differ.
pub fn diagonal_inds(tensor: &Tensor) -> Result<Vec<usize>> {
    let shape = tensor.shape();
    if shape.len() < 2 {
        return Err(RelGatError::rank_mismatch("diagonal_inds input", 2, shape));
    }
    if shape[0] != shape[1] {
        return Err(RelGatError::dimension_mismatch(
            "square leading dims",
            shape[0],
            shape[1],
        ));
    }
    let size = shape[0];
    Ok((0..size).map(|i| (size + 1) * i).collect())
}

/// Multi-indices of every element of `scores`, highest score first.
///
/// Ties keep flat order.
#[must_use]
pub fn argsort_desc(scores: &Tensor) -> Vec<Vec<usize>> {
    let data = scores.data();
    let mut order: Vec<usize> = (0..data.len()).collect();
    order.sort_by(|&a, &b| data[b].total_cmp(&data[a]));
    unravel_index(&order, scores.shape())
}

/// Convert flat offsets into coordinates over `dims` (row-major).
#[must_use]
pub fn unravel_index(index: &[usize], dims: &[usize]) -> Vec<Vec<usize>> {
    index
        .iter()
        .map(|&flat| {
            let mut rest = flat;
            let mut coords = vec![0; dims.len()];
            for (c, &d) in coords.iter_mut().zip(dims).rev() {
                if d > 0 {
                    *c = rest % d;
                    rest /= d;
                }
            }
            coords
        })
        .collect()
}

/// Split the rows of `tensor` into consecutive chunks of the given sizes.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `tensor` is not rank 2 or the chunks need more
/// rows than it has.
pub fn de_chunkize(tensor: &Tensor, chunks: &[usize]) -> Result<Vec<Tensor>> {
    let rows = tensor.dims2("de_chunkize input")?.0;
    let needed: usize = chunks.iter().sum();
    if needed > rows {
        return Err(RelGatError::dimension_mismatch("rows", needed, rows));
    }
    let mut start = 0;
    let mut out = Vec::with_capacity(chunks.len());
    for &c in chunks {
        let idx: Vec<usize> = (start..start + c).collect();
        out.push(tensor.index_select_rows(&idx)?);
        start += c;
    }
    Ok(out)
}

/// `(start, end)` ranges covering `0..len` in steps of `batch_size`.
///
/// With `skip_end` the trailing partial batch is dropped. A zero batch size
/// yields nothing.
pub fn batch_index_iterator(
    len: usize,
    batch_size: usize,
    skip_end: bool,
) -> impl Iterator<Item = (usize, usize)> {
    let until = match batch_size {
        0 => 0,
        b if skip_end => (len / b) * b,
        _ => len,
    };
    (0..until)
        .step_by(batch_size.max(1))
        .map(move |start| (start, (start + batch_size).min(len)))
}

/// Every ordered pair `(a, b)` with `a != b` over `0..n`, row-major.
#[must_use]
pub fn nonintersecting_2d_inds(n: usize) -> Vec<(usize, usize)> {
    (0..n)
        .flat_map(|a| (0..n).filter(move |&b| b != a).map(move |b| (a, b)))
        .collect()
}

/// `[m1, m2]` matrix telling whether row `i` of `x1` equals row `j` of `x2`.
///
/// # Errors
///
/// Returns `ShapeMismatch` if rows have different widths.
pub fn intersect_2d<T: PartialEq, R: AsRef<[T]>>(x1: &[R], x2: &[R]) -> Result<Vec<Vec<bool>>> {
    let width = x1
        .first()
        .or_else(|| x2.first())
        .map_or(0, |r| r.as_ref().len());
    for row in x1.iter().chain(x2) {
        let len = row.as_ref().len();
        if len != width {
            return Err(RelGatError::dimension_mismatch(
                "intersect_2d columns",
                width,
                len,
            ));
        }
    }
    Ok(x1
        .iter()
        .map(|a| x2.iter().map(|b| a.as_ref() == b.as_ref()).collect())
        .collect())
}

fn check_sorted_desc(lengths: &[usize]) -> Result<()> {
    if lengths.windows(2).any(|w| w[0] < w[1]) {
        return Err(RelGatError::ShapeMismatch {
            expected: "sequence lengths in decreasing order".to_string(),
            actual: format!("{lengths:?}"),
        });
    }
    Ok(())
}

/// Permutation from a time-major packed sequence to a batch-major one (or
/// back), plus the batch size at every time step.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `lengths` is not sorted in decreasing order.
///
/// # Example
///
/// ```
/// use relgat::ops::transpose_packed_sequence_inds;
///
/// let (inds, lens) = transpose_packed_sequence_inds(&[3, 1]).unwrap();
/// assert_eq!(inds, vec![0, 3, 1, 2]);
/// assert_eq!(lens, vec![2, 1, 1]);
/// ```
pub fn transpose_packed_sequence_inds(lengths: &[usize]) -> Result<(Vec<usize>, Vec<usize>)> {
    check_sorted_desc(lengths)?;
    let Some(&max_len) = lengths.first() else {
        return Ok((Vec::new(), Vec::new()));
    };

    let mut offsets: Vec<usize> = lengths
        .iter()
        .scan(0, |acc, &l| {
            let start = *acc;
            *acc += l;
            Some(start)
        })
        .collect();
    let mut active = lengths.len();
    let mut inds = Vec::with_capacity(lengths.iter().sum());
    let mut lens = Vec::with_capacity(max_len);
    for t in 0..max_len {
        while active > 1 && lengths[active - 1] <= t {
            active -= 1;
        }
        inds.extend_from_slice(&offsets[..active]);
        for o in &mut offsets[..active] {
            *o += 1;
        }
        lens.push(active);
    }
    Ok((inds, lens))
}

/// Indices of a packed sequence shifted right by one step, leaving room
/// for a begin-of-sequence token.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `lengths` is not sorted in decreasing order.
pub fn right_shift_packed_sequence_inds(lengths: &[usize]) -> Result<Vec<usize>> {
    check_sorted_desc(lengths)?;
    let mut cur = 0;
    let mut inds = Vec::new();
    for w in lengths.windows(2) {
        inds.extend(cur..cur + w[1]);
        cur += w[0];
    }
    Ok(inds)
}

/// Column indices of each row of `[B, C]` scores, highest first.
fn rows_sorted_desc(scores: &Tensor) -> Result<Vec<Vec<usize>>> {
    let (rows, cols) = scores.dims2("scores")?;
    Ok((0..rows)
        .map(|r| {
            let row = scores.row(r);
            let mut order: Vec<usize> = (0..cols).collect();
            order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
            order
        })
        .collect())
}

/// Precision@k in percent for every `k` in `topk`.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `output` is not `[B, C]` with `B = target.len()`.
pub fn topk_accuracy(output: &Tensor, target: &[usize], topk: &[usize]) -> Result<Vec<f32>> {
    let (batch, _) = output.dims2("topk_accuracy output")?;
    if batch != target.len() {
        return Err(RelGatError::dimension_mismatch("targets", batch, target.len()));
    }
    let ranked = rows_sorted_desc(output)?;
    Ok(topk
        .iter()
        .map(|&k| {
            let correct = ranked
                .iter()
                .zip(target)
                .filter(|(order, t)| order.iter().take(k).any(|c| c == *t))
                .count();
            if batch == 0 {
                0.0
            } else {
                correct as f32 * 100.0 / batch as f32
            }
        })
        .collect())
}

/// Rank of the true label in each row of `predictions` (0 = best guess) and
/// the first `num_guesses` guesses per row.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `predictions` is not `[B, R]` with
/// `B = labels.len()` or a label is not below `R`.
pub fn get_ranking(
    predictions: &Tensor,
    labels: &[usize],
    num_guesses: usize,
) -> Result<(Vec<usize>, Vec<Vec<usize>>)> {
    let (batch, range) = predictions.dims2("get_ranking predictions")?;
    if batch != labels.len() {
        return Err(RelGatError::dimension_mismatch("labels", batch, labels.len()));
    }
    let ranked = rows_sorted_desc(predictions)?;

    let mut gt_ranks = Vec::with_capacity(batch);
    for (order, &label) in ranked.iter().zip(labels) {
        let rank = order
            .iter()
            .position(|&c| c == label)
            .ok_or_else(|| RelGatError::dimension_mismatch("label < range", range, label))?;
        gt_ranks.push(rank);
    }
    let guesses = ranked
        .into_iter()
        .map(|mut order| {
            order.truncate(num_guesses);
            order
        })
        .collect();
    Ok((gt_ranks, guesses))
}

/// Up to `num` distinct items drawn without replacement.
///
/// When `num` covers every item the input is returned unchanged.
pub fn random_choose<T: Clone, R: Rng + ?Sized>(items: &[T], num: usize, rng: &mut R) -> Vec<T> {
    if num >= items.len() {
        return items.to_vec();
    }
    sample(rng, items.len(), num)
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

/// Consecutive overlapping pairs: `s -> (s0, s1), (s1, s2), ...`.
pub fn pairwise<I>(iterable: I) -> impl Iterator<Item = (I::Item, I::Item)>
where
    I: IntoIterator,
    I::IntoIter: Clone,
{
    let first = iterable.into_iter();
    let second = first.clone().skip(1);
    first.zip(second)
}
