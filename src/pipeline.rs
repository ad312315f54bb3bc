//! Per-individual placement of study genotypes into the reference PC space.

use crate::config::{AnalysisSettings, MISSING_GENOTYPE};
use crate::covariance::{augment, reference_covariance, LocusPartition};
use crate::dimension::{embed_top_components, select_dimension};
use crate::error::TraceError;
use crate::linalg::LinalgBackend;
use crate::normalize::{LocusStandardization, NormalizedReference};
use crate::outlier::neighbor_zscore;
use crate::procrustes::{projection_procrustes, ProjectionOptions};
use log::{debug, error, warn};
use ndarray::{s, Array1, Array2, ArrayView1};

/// Read-only reference structures shared by every study individual.
#[derive(Debug, Clone)]
pub struct ReferencePanel {
    normalized: Array2<f64>,
    standardization: LocusStandardization,
    covariance: Array2<f64>,
    coordinates: Array2<f64>,
}

impl ReferencePanel {
    /// Builds the kinship matrix from `reference` and pairs it with the
    /// REF_SIZE x DIM reference coordinates.
    pub fn new(reference: NormalizedReference, coordinates: Array2<f64>) -> Result<Self, TraceError> {
        let covariance = reference_covariance(&reference.genotypes);
        Self::from_parts(reference, covariance, coordinates)
    }

    /// Same as [`ReferencePanel::new`] for a covariance that was already
    /// computed (e.g. for the reference PCA).
    pub fn from_parts(
        reference: NormalizedReference,
        covariance: Array2<f64>,
        coordinates: Array2<f64>,
    ) -> Result<Self, TraceError> {
        let ref_size = reference.genotypes.nrows();
        if covariance.dim() != (ref_size, ref_size) {
            return Err(TraceError::ShapeMismatch {
                context: "reference covariance",
                expected: format!("{0}x{0}", ref_size),
                found: format!("{}x{}", covariance.nrows(), covariance.ncols()),
            });
        }
        if reference.standardization.num_loci() != reference.genotypes.ncols() {
            return Err(TraceError::ShapeMismatch {
                context: "locus standardization",
                expected: format!("{} loci", reference.genotypes.ncols()),
                found: format!("{} loci", reference.standardization.num_loci()),
            });
        }
        if coordinates.nrows() != ref_size {
            return Err(TraceError::ShapeMismatch {
                context: "reference coordinates",
                expected: format!("{} rows", ref_size),
                found: format!("{} rows", coordinates.nrows()),
            });
        }
        Ok(Self {
            normalized: reference.genotypes,
            standardization: reference.standardization,
            covariance,
            coordinates,
        })
    }

    pub fn ref_size(&self) -> usize {
        self.normalized.nrows()
    }

    pub fn num_loci(&self) -> usize {
        self.standardization.num_loci()
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn coordinates(&self) -> &Array2<f64> {
        &self.coordinates
    }
}

/// Successful placement of one individual.
#[derive(Debug, Clone)]
pub struct AlignedIndividual {
    /// Working dimension `K` used for the alignment.
    pub dimensions: usize,
    pub similarity: f64,
    /// `None` when the neighbours' self-covariances are all equal.
    pub zscore: Option<f64>,
    /// First DIM aligned coordinates.
    pub coordinates: Array1<f64>,
    pub converged: bool,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub enum PlacementOutcome {
    /// Fewer than MIN_LOCI non-missing loci.
    InsufficientLoci,
    /// Procrustes could not be computed (SVD failure or a degenerate embedding).
    AlignmentFailed { dimensions: usize },
    Placed(AlignedIndividual),
}

/// Result for one study individual.
#[derive(Debug, Clone)]
pub struct Placement {
    /// Non-missing loci `L`.
    pub loci_used: usize,
    pub outcome: PlacementOutcome,
}

/// Runs augmentation, eigendecomposition, alignment and scoring for study
/// individuals against one reference panel.
pub struct StudyAnalyzer<'a, B: LinalgBackend + ?Sized> {
    panel: &'a ReferencePanel,
    settings: &'a AnalysisSettings,
    backend: &'a B,
}

impl<'a, B: LinalgBackend + ?Sized> StudyAnalyzer<'a, B> {
    pub fn new(panel: &'a ReferencePanel, settings: &'a AnalysisSettings, backend: &'a B) -> Result<Self, TraceError> {
        if panel.coordinates.ncols() != settings.dim {
            return Err(TraceError::ShapeMismatch {
                context: "reference coordinates",
                expected: format!("{} columns (DIM)", settings.dim),
                found: format!("{} columns", panel.coordinates.ncols()),
            });
        }
        Ok(Self {
            panel,
            settings,
            backend,
        })
    }

    /// Places one individual given its genotypes at the shared loci
    /// (`-9` for missing). Only hard failures (shape errors, eigensolver
    /// failure) are returned as `Err`.
    pub fn analyze(&self, genotypes: ArrayView1<f64>, label: &str) -> Result<Placement, TraceError> {
        let panel = self.panel;
        let settings = self.settings;
        if genotypes.len() != panel.num_loci() {
            return Err(TraceError::ShapeMismatch {
                context: "study genotypes",
                expected: format!("{} shared loci", panel.num_loci()),
                found: format!("{} loci", genotypes.len()),
            });
        }

        let partition = LocusPartition::from_genotypes(genotypes, MISSING_GENOTYPE);
        let loci_used = partition.num_present();
        if loci_used < settings.min_loci {
            debug!(
                "{}: {} non-missing loci is below MIN_LOCI={}",
                label, loci_used, settings.min_loci
            );
            return Ok(Placement {
                loci_used,
                outcome: PlacementOutcome::InsufficientLoci,
            });
        }

        let deviations = panel.standardization.standardize_individual(genotypes);
        let augmented = augment(&panel.normalized, &panel.covariance, &deviations, &partition)?;
        let eigen = self.backend.symmetric_eigendecompose(&augmented)?;
        let dimensions = select_dimension(&settings.components, &eigen.values, settings.dim, label);
        let embedding = embed_top_components(&eigen, dimensions)?;

        let options = ProjectionOptions {
            max_iterations: settings.max_iterations,
            threshold: settings.convergence_threshold,
            scale_mode: settings.scale_mode,
        };
        let fit = match projection_procrustes(
            embedding.reference.view(),
            panel.coordinates.view(),
            &options,
            self.backend,
        ) {
            Ok(fit) => fit,
            Err(e) if e.is_alignment_failure() => {
                error!("Procrustes analysis failed for {}: {}", label, e);
                return Ok(Placement {
                    loci_used,
                    outcome: PlacementOutcome::AlignmentFailed { dimensions },
                });
            }
            Err(e) => return Err(e),
        };
        if !fit.converged {
            warn!(
                "Projection Procrustes analysis doesn't converge in {} iterations for {}, THRESHOLD={}.",
                settings.max_iterations, label, settings.convergence_threshold
            );
        }

        let rotated = fit.apply(embedding.individual.view());
        let coordinates = rotated.slice(s![..settings.dim]).to_owned();

        let ref_size = panel.ref_size();
        let reference_diagonal = augmented.slice(s![..ref_size, ..ref_size]).diag().to_owned();
        let zscore = neighbor_zscore(
            coordinates.view(),
            panel.coordinates.view(),
            reference_diagonal.view(),
            augmented[[ref_size, ref_size]],
            settings.knn,
        )?;

        Ok(Placement {
            loci_used,
            outcome: PlacementOutcome::Placed(AlignedIndividual {
                dimensions,
                similarity: fit.similarity,
                zscore,
                coordinates,
                converged: fit.converged,
                iterations: fit.iterations,
            }),
        })
    }
}
