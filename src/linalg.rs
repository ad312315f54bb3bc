//! Narrow interface to the dense linear-algebra routines the pipeline needs.
//!
//! Everything above this module talks to [`LinalgBackend`] only, so the
//! LAPACK provider can be swapped without touching pipeline logic.

use crate::error::TraceError;
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, SVD, UPLO};

/// Eigenpairs of a symmetric matrix.
///
/// `values` are in ascending order and `vectors` holds the matching
/// eigenvectors as columns, so the top components sit at the end.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub values: Array1<f64>,
    pub vectors: Array2<f64>,
}

/// Thin singular value decomposition `C = U * diag(s) * V^T`.
///
/// Note that `v` is V itself, not its transpose.
#[derive(Debug, Clone)]
pub struct SingularValueDecomposition {
    pub u: Array2<f64>,
    pub singular_values: Array1<f64>,
    pub v: Array2<f64>,
}

pub trait LinalgBackend {
    fn symmetric_eigendecompose(&self, matrix: &Array2<f64>) -> Result<SymmetricEigen, TraceError>;

    fn singular_value_decompose(
        &self,
        matrix: &Array2<f64>,
    ) -> Result<SingularValueDecomposition, TraceError>;
}

/// Backend over `ndarray-linalg`; the LAPACK provider is picked by Cargo feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapackBackend;

impl LinalgBackend for LapackBackend {
    fn symmetric_eigendecompose(&self, matrix: &Array2<f64>) -> Result<SymmetricEigen, TraceError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(TraceError::ShapeMismatch {
                context: "symmetric eigendecomposition",
                expected: "a square matrix".to_string(),
                found: format!("{}x{}", matrix.nrows(), matrix.ncols()),
            });
        }
        let (values, vectors) = matrix
            .eigh(UPLO::Lower)
            .map_err(TraceError::Eigendecomposition)?;
        Ok(SymmetricEigen { values, vectors })
    }

    fn singular_value_decompose(
        &self,
        matrix: &Array2<f64>,
    ) -> Result<SingularValueDecomposition, TraceError> {
        let (u, singular_values, vt) = matrix
            .svd(true, true)
            .map_err(TraceError::SvdNoConvergence)?;
        let u = u.ok_or(TraceError::MissingFactor("U"))?;
        let vt = vt.ok_or(TraceError::MissingFactor("V^T"))?;
        Ok(SingularValueDecomposition {
            u,
            singular_values,
            v: vt.t().to_owned(),
        })
    }
}
