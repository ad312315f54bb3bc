//! Sample-specific embedding from the augmented eigendecomposition and
//! automatic choice of how many of its components are informative.

use crate::config::ComponentSelection;
use crate::error::TraceError;
use crate::linalg::SymmetricEigen;
use log::warn;
use ndarray::{Array1, Array2};

/// Top-`k` coordinates of the reference panel and the new individual, taken
/// from one eigendecomposition of the augmented matrix.
#[derive(Debug, Clone)]
pub struct AugmentedEmbedding {
    /// REF_SIZE x k.
    pub reference: Array2<f64>,
    /// Length k.
    pub individual: Array1<f64>,
}

/// Scales the `k` leading eigenvectors by `sqrt(eigenvalue)`.
///
/// The solver returns ascending eigenvalues, so component `j` is read from
/// column `len - 1 - j`. The last row belongs to the new individual.
pub fn embed_top_components(eigen: &SymmetricEigen, k: usize) -> Result<AugmentedEmbedding, TraceError> {
    let size = eigen.values.len();
    if eigen.vectors.dim() != (size, size) || size < 2 {
        return Err(TraceError::ShapeMismatch {
            context: "augmented eigendecomposition",
            expected: format!("{0}x{0} eigenvectors with at least 2 rows", size),
            found: format!("{}x{}", eigen.vectors.nrows(), eigen.vectors.ncols()),
        });
    }
    if k > size {
        return Err(TraceError::InvalidConfig(format!(
            "cannot take {} components from a {}x{} augmented matrix",
            k, size, size
        )));
    }
    let ref_size = size - 1;
    let mut reference = Array2::<f64>::zeros((ref_size, k));
    let mut individual = Array1::<f64>::zeros(k);
    for j in 0..k {
        let col = size - 1 - j;
        // Round-off can push a zero eigenvalue slightly negative.
        let scale = eigen.values[col].max(0.0).sqrt();
        for i in 0..ref_size {
            reference[[i, j]] = eigen.vectors[[i, col]] * scale;
        }
        individual[j] = eigen.vectors[[ref_size, col]] * scale;
    }
    Ok(AugmentedEmbedding {
        reference,
        individual,
    })
}

/// Tracy-Widom statistic of the largest eigenvalue in a pool (Patterson et
/// al. 2006).
///
/// `eigsum` and `eig2sum` are the sum and the sum of squares over the `m`
/// pool eigenvalues. Returns `None` when the effective marker count `n` is
/// not defined for this pool.
pub fn tracy_widom_statistic(largest: f64, eigsum: f64, eig2sum: f64, m: usize) -> Option<f64> {
    if m < 2 || eigsum <= 0.0 {
        return None;
    }
    let mf = m as f64;
    let eigsum2 = eigsum * eigsum;
    let denominator = (mf - 1.0) * eig2sum - eigsum2;
    if denominator <= 0.0 {
        return None;
    }
    let n = (mf + 1.0) * eigsum2 / denominator;
    if n <= 1.0 {
        return None;
    }
    let nsqrt = (n - 1.0).sqrt();
    let msqrt = mf.sqrt();
    let mu = (nsqrt + msqrt).powi(2) / n;
    let sigma = (nsqrt + msqrt) / n * (1.0 / nsqrt + 1.0 / msqrt).powf(1.0 / 3.0);
    Some((mf * largest / eigsum - mu) / sigma)
}

/// Counts leading eigenvalues that are significant outliers.
///
/// `pool` must be sorted in descending order. Each step tests the largest
/// remaining eigenvalue against the rest of the pool; on success it is
/// removed from the running sums and the next one is tested. Stops at the
/// first non-significant eigenvalue.
pub fn count_significant_components(pool: &[f64], critical_value: f64) -> usize {
    let mut eigsum: f64 = pool.iter().sum();
    let mut eig2sum: f64 = pool.iter().map(|v| v * v).sum();
    let mut selected = 0;
    for (j, &largest) in pool.iter().enumerate() {
        let m = pool.len() - j;
        match tracy_widom_statistic(largest, eigsum, eig2sum, m) {
            Some(x) if x > critical_value => {
                selected += 1;
                eigsum -= largest;
                eig2sum -= largest * largest;
            }
            _ => break,
        }
    }
    selected
}

/// Resolves the working dimension for one individual.
///
/// Automatic selection tests the top REF_SIZE of the REF_SIZE+1 eigenvalues
/// and is clamped up to `dim` (with a warning) when too few are significant.
pub fn select_dimension(
    selection: &ComponentSelection,
    eigenvalues_ascending: &Array1<f64>,
    dim: usize,
    individual_label: &str,
) -> usize {
    match *selection {
        ComponentSelection::Fixed(k) => k,
        ComponentSelection::TracyWidom { critical_value, .. } => {
            let pool: Vec<f64> = eigenvalues_ascending.iter().skip(1).rev().copied().collect();
            let selected = count_significant_components(&pool, critical_value);
            if selected < dim {
                warn!(
                    "DIM ({}) is greater than the number of significant PCs ({}) for study individual {}; using DIM.",
                    dim, selected, individual_label
                );
                dim
            } else {
                selected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TRACY_WIDOM_CRITICAL_VALUES;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Descending Marchenko-Pastur-like bulk around 1.0.
    fn bulk(m: usize) -> Vec<f64> {
        (0..m)
            .map(|i| 1.5 - (i as f64) / (m as f64 - 1.0))
            .collect()
    }

    #[test]
    fn single_spike_selects_one_component() {
        let mut pool = bulk(100);
        pool.insert(0, 40.0);
        let eigsum: f64 = pool.iter().sum();
        let eig2sum: f64 = pool.iter().map(|v| v * v).sum();
        let spike_stat = tracy_widom_statistic(pool[0], eigsum, eig2sum, pool.len()).unwrap();
        for &(_, critical) in TRACY_WIDOM_CRITICAL_VALUES.iter() {
            let rest = &pool[1..];
            let rest_sum: f64 = rest.iter().sum();
            let rest_sq: f64 = rest.iter().map(|v| v * v).sum();
            let second = tracy_widom_statistic(rest[0], rest_sum, rest_sq, rest.len()).unwrap();
            if critical < spike_stat && second <= critical {
                assert_eq!(count_significant_components(&pool, critical), 1);
            }
        }
        assert!(spike_stat > 3.2712);
    }

    #[test]
    fn flat_spectrum_selects_nothing() {
        let pool = vec![1.0; 50];
        assert_eq!(count_significant_components(&pool, -0.1653), 0);
    }

    #[test]
    fn degenerate_pools_have_no_statistic() {
        assert!(tracy_widom_statistic(1.0, 1.0, 1.0, 1).is_none());
        assert!(tracy_widom_statistic(1.0, 0.0, 0.0, 5).is_none());
    }

    #[test]
    fn automatic_selection_is_clamped_to_dim() {
        let values = Array1::from_elem(30, 1.0);
        let selection = ComponentSelection::TracyWidom {
            alpha: 0.01,
            critical_value: 2.0233,
        };
        assert_eq!(select_dimension(&selection, &values, 3, "test"), 3);
        assert_eq!(select_dimension(&ComponentSelection::Fixed(7), &values, 3, "test"), 7);
    }

    #[test]
    fn automatic_selection_ignores_smallest_eigenvalue() {
        // ascending; the leading two are spikes
        let mut ascending = bulk(80);
        ascending.reverse();
        ascending.extend_from_slice(&[30.0, 60.0]);
        ascending.insert(0, -1e-12);
        let values = Array1::from(ascending);
        let selection = ComponentSelection::TracyWidom {
            alpha: 0.001,
            critical_value: 3.2712,
        };
        assert_eq!(select_dimension(&selection, &values, 1, "test"), 2);
    }

    #[test]
    fn embedding_reads_columns_from_the_top() {
        let eigen = SymmetricEigen {
            values: array![0.0, 1.0, 4.0],
            vectors: array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        };
        let emb = embed_top_components(&eigen, 2).unwrap();
        assert_eq!(emb.reference.dim(), (2, 2));
        assert_abs_diff_eq!(emb.individual[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(emb.reference[[1, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(emb.reference[[0, 0]], 0.0, epsilon = 1e-12);
        assert!(embed_top_components(&eigen, 4).is_err());
    }
}
