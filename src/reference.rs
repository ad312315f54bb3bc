//! Reference PC space: computed from the kinship matrix or supplied.

use crate::error::TraceError;
use crate::linalg::LinalgBackend;
use log::{info, warn};
use ndarray::{s, Array2};

/// PCA of the reference kinship matrix.
#[derive(Debug, Clone)]
pub struct ReferencePca {
    /// REF_SIZE x DIM; column j is eigenvector j scaled by sqrt(eigenvalue j).
    pub coordinates: Array2<f64>,
    /// Percent of the eigenvalue sum explained by each retained component.
    pub variance_explained: Vec<f64>,
}

/// Top-`dim` principal components of the reference covariance `M`.
pub fn run_reference_pca<B: LinalgBackend + ?Sized>(
    covariance: &Array2<f64>,
    dim: usize,
    backend: &B,
) -> Result<ReferencePca, TraceError> {
    let ref_size = covariance.nrows();
    if dim == 0 || dim > ref_size {
        return Err(TraceError::InvalidConfig(format!(
            "cannot compute {} PCs from {} reference individuals",
            dim, ref_size
        )));
    }
    let eigen = backend.symmetric_eigendecompose(covariance)?;
    let total: f64 = eigen.values.sum();
    if total <= 0.0 {
        warn!("Reference covariance has a non-positive eigenvalue sum ({}); variance percentages are undefined.", total);
    }

    let mut coordinates = Array2::<f64>::zeros((ref_size, dim));
    let mut variance_explained = Vec::with_capacity(dim);
    for j in 0..dim {
        let col = ref_size - 1 - j;
        let value = eigen.values[col];
        coordinates
            .column_mut(j)
            .assign(&(&eigen.vectors.column(col) * value.max(0.0).sqrt()));
        variance_explained.push(value / total * 100.0);
    }
    info!(
        "Reference PCA: top {} components explain {:.2}% of the total variance.",
        dim,
        variance_explained.iter().sum::<f64>()
    );
    Ok(ReferencePca {
        coordinates,
        variance_explained,
    })
}

/// Keeps the first `dim` columns of a supplied coordinate table after
/// checking it covers the reference panel.
pub fn supplied_coordinates(coordinates: Array2<f64>, ref_size: usize, dim: usize) -> Result<Array2<f64>, TraceError> {
    if coordinates.nrows() != ref_size {
        return Err(TraceError::ShapeMismatch {
            context: "reference coordinates",
            expected: format!("{} individuals", ref_size),
            found: format!("{} individuals", coordinates.nrows()),
        });
    }
    if coordinates.ncols() < dim {
        return Err(TraceError::InvalidConfig(format!(
            "DIM (-k) cannot be greater than the number of PCs in the COORD_FILE (DIM={}, PCs={}).",
            dim,
            coordinates.ncols()
        )));
    }
    if coordinates.ncols() == dim {
        Ok(coordinates)
    } else {
        Ok(coordinates.slice(s![.., ..dim]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::LapackBackend;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn pca_recovers_scaled_leading_eigenvectors() {
        let m = array![[4.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let pca = run_reference_pca(&m, 2, &LapackBackend).unwrap();
        assert_eq!(pca.coordinates.dim(), (3, 2));
        assert_abs_diff_eq!(pca.coordinates[[0, 0]].abs(), 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(pca.coordinates[[1, 1]].abs(), 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(pca.variance_explained[0], 80.0, epsilon = 1e-10);
        assert_abs_diff_eq!(pca.variance_explained[1], 20.0, epsilon = 1e-10);
    }

    #[test]
    fn coordinates_reproduce_covariance_of_rank_two_matrix() {
        let g = array![[1.0, -1.0, 0.5], [-0.5, 2.0, 1.0], [-0.5, -1.0, -1.5]];
        let m = g.dot(&g.t());
        let pca = run_reference_pca(&m, 2, &LapackBackend).unwrap();
        let rebuilt = pca.coordinates.dot(&pca.coordinates.t());
        // the centered rows span two dimensions, so two PCs rebuild M
        for (a, b) in rebuilt.iter().zip(m.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn supplied_coordinates_are_truncated_to_dim() {
        let coords = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let kept = supplied_coordinates(coords.clone(), 2, 2).unwrap();
        assert_eq!(kept, array![[1.0, 2.0], [4.0, 5.0]]);
        assert!(supplied_coordinates(coords.clone(), 3, 2).is_err());
        assert!(supplied_coordinates(coords, 2, 4).is_err());
    }
}
