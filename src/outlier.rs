//! Nearest-neighbour outlier score.

use crate::error::TraceError;
use ndarray::{ArrayView1, ArrayView2};

/// Indices of the `k` reference rows closest to `point` (squared Euclidean
/// distance over the columns of `reference`), nearest first. Ties keep row
/// order.
pub fn nearest_neighbors(point: ArrayView1<f64>, reference: ArrayView2<f64>, k: usize) -> Vec<usize> {
    let mut distances: Vec<(usize, f64)> = reference
        .outer_iter()
        .enumerate()
        .map(|(i, row)| {
            let d: f64 = row
                .iter()
                .zip(point.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            (i, d)
        })
        .collect();
    distances.sort_by(|a, b| a.1.total_cmp(&b.1));
    distances.into_iter().take(k).map(|(i, _)| i).collect()
}

/// Z-score of the individual's self-covariance against the self-covariances
/// of its `k` nearest reference neighbours in the aligned space.
///
/// `point` and `reference` must already be truncated to the output
/// dimension. `reference_self_covariance` is the reference block diagonal of
/// the individual's augmented matrix. Returns `None` when the neighbours'
/// self-covariances have no spread.
pub fn neighbor_zscore(
    point: ArrayView1<f64>,
    reference: ArrayView2<f64>,
    reference_self_covariance: ArrayView1<f64>,
    self_covariance: f64,
    k: usize,
) -> Result<Option<f64>, TraceError> {
    let ref_size = reference.nrows();
    if reference.ncols() != point.len() {
        return Err(TraceError::ShapeMismatch {
            context: "outlier score",
            expected: format!("{} coordinate columns", point.len()),
            found: format!("{}", reference.ncols()),
        });
    }
    if reference_self_covariance.len() != ref_size {
        return Err(TraceError::ShapeMismatch {
            context: "outlier score",
            expected: format!("{} reference self-covariances", ref_size),
            found: format!("{}", reference_self_covariance.len()),
        });
    }
    if k < 2 || k > ref_size {
        return Err(TraceError::InvalidConfig(format!(
            "KNN_ZSCORE must be between 2 and REF_SIZE={}, got {}.",
            ref_size, k
        )));
    }

    let neighbors = nearest_neighbors(point, reference, k);
    let values: Vec<f64> = neighbors.iter().map(|&i| reference_self_covariance[i]).collect();
    let kf = k as f64;
    let mean = values.iter().sum::<f64>() / kf;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (kf - 1.0);
    let sd = variance.sqrt();
    if sd > 0.0 {
        Ok(Some((self_covariance - mean) / sd))
    } else {
        Ok(None)
    }
}
