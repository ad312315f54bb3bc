use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Errors raised by the numerical core.
///
/// Per-individual conditions that should not stop a run (too few loci, a
/// non-converged projection) are not errors; they are carried in the
/// analysis outcome instead.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch in {context}: expected {expected}, found {found}.")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    #[error("Projection Procrustes requires the source configuration to have at least as many dimensions as the target (source has {source_dims}, target has {target_dims}).")]
    TargetDimensionTooHigh {
        source_dims: usize,
        target_dims: usize,
    },

    #[error("Procrustes analysis is undefined for a configuration with zero spread ({0}).")]
    DegenerateConfiguration(&'static str),

    #[error("Symmetric eigendecomposition failed: {0}")]
    Eigendecomposition(#[source] LinalgError),

    #[error("Singular value decomposition did not converge: {0}")]
    SvdNoConvergence(#[source] LinalgError),

    #[error("Linear algebra backend returned no {0} factor.")]
    MissingFactor(&'static str),
}

impl TraceError {
    /// True for failures inside a single Procrustes fit, which the pipeline
    /// records as a failed alignment for that individual rather than aborting.
    pub fn is_alignment_failure(&self) -> bool {
        matches!(
            self,
            TraceError::SvdNoConvergence(_)
                | TraceError::DegenerateConfiguration(_)
                | TraceError::MissingFactor(_)
        )
    }
}
