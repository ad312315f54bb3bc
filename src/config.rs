use crate::error::TraceError;
use log::warn;

/// Missing-genotype sentinel in every genotype table.
pub const MISSING_GENOTYPE: f64 = -9.0;

pub const DEFAULT_DIM: usize = 2;
pub const DEFAULT_DIM_HIGH: usize = 20;
pub const DEFAULT_MIN_LOCI: usize = 100;
pub const DEFAULT_ALPHA: f64 = 0.1;
pub const DEFAULT_THRESHOLD: f64 = 1e-6;
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;
pub const DEFAULT_KNN: usize = 10;

/// Tracy-Widom critical values for the supported significance levels
/// (Patterson et al. 2006, Table 1 of the TW distribution).
pub const TRACY_WIDOM_CRITICAL_VALUES: [(f64, f64); 7] = [
    (0.2, -0.1653),
    (0.15, 0.1038),
    (0.1, 0.4501),
    (0.05, 0.9793),
    (0.01, 2.0233),
    (0.005, 2.4221),
    (0.001, 3.2712),
];

/// Looks up the critical value for `alpha`; `None` for unsupported levels.
pub fn tracy_widom_critical_value(alpha: f64) -> Option<f64> {
    TRACY_WIDOM_CRITICAL_VALUES
        .iter()
        .find(|(level, _)| (level - alpha).abs() < 1e-12)
        .map(|&(_, critical)| critical)
}

/// How the Procrustes scale factor is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// `rho = sum(singular values) / trace(Xc^T Xc)`.
    #[default]
    MaximizeSimilarity,
    /// `rho = sqrt(trace(Yc^T Yc) / trace(Xc^T Xc))`.
    MatchVariance,
}

impl ScaleMode {
    pub fn from_code(code: u8) -> Result<Self, TraceError> {
        match code {
            0 => Ok(Self::MaximizeSimilarity),
            1 => Ok(Self::MatchVariance),
            other => Err(TraceError::InvalidConfig(format!(
                "PROCRUSTES_SCALE must be 0 or 1, got {}.",
                other
            ))),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::MaximizeSimilarity => 0,
            Self::MatchVariance => 1,
        }
    }
}

/// Number of sample-specific components used before Procrustes alignment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ComponentSelection {
    Fixed(usize),
    /// Re-selected for every individual from the Tracy-Widom statistic.
    TracyWidom { alpha: f64, critical_value: f64 },
}

impl ComponentSelection {
    /// `dim_high == 0` requests automatic selection at `alpha`.
    pub fn from_dim_high(dim_high: usize, alpha: f64) -> Result<Self, TraceError> {
        if dim_high > 0 {
            return Ok(Self::Fixed(dim_high));
        }
        let critical_value = tracy_widom_critical_value(alpha).ok_or_else(|| {
            TraceError::InvalidConfig(format!(
                "ALPHA={} is not supported; allowed values are 0.001, 0.005, 0.01, 0.05, 0.1, 0.15 and 0.2.",
                alpha
            ))
        })?;
        Ok(Self::TracyWidom {
            alpha,
            critical_value,
        })
    }
}

/// Immutable settings consumed by the numerical core.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    /// Output dimension (`DIM`): PCs of the reference space to match.
    pub dim: usize,
    pub components: ComponentSelection,
    pub min_loci: usize,
    pub scale_mode: ScaleMode,
    pub knn: usize,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            components: ComponentSelection::Fixed(DEFAULT_DIM_HIGH),
            min_loci: DEFAULT_MIN_LOCI,
            scale_mode: ScaleMode::default(),
            knn: DEFAULT_KNN,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Sizes known only once the input tables have been scanned.
#[derive(Clone, Copy, Debug)]
pub struct DataDimensions {
    pub ref_size: usize,
    pub shared_loci: usize,
    /// Coordinate columns in a supplied reference coordinate table.
    pub supplied_pcs: Option<usize>,
}

impl AnalysisSettings {
    /// Checks the settings against the data. `MIN_LOCI <= DIM` is the one
    /// correctable case: it is raised to `DIM + 1` with a warning.
    pub fn validated(mut self, data: &DataDimensions) -> Result<Self, TraceError> {
        let invalid = |msg: String| Err(TraceError::InvalidConfig(msg));

        if self.dim < 1 {
            return invalid("DIM (-k) must be a positive integer.".to_string());
        }
        if self.dim >= data.ref_size {
            return invalid(format!(
                "DIM (-k) must be smaller than REF_SIZE (DIM={}, REF_SIZE={}).",
                self.dim, data.ref_size
            ));
        }
        if self.dim >= data.shared_loci {
            return invalid(format!(
                "DIM (-k) must be smaller than the number of shared loci (DIM={}, LOCI={}).",
                self.dim, data.shared_loci
            ));
        }
        if let Some(pcs) = data.supplied_pcs {
            if self.dim > pcs {
                return invalid(format!(
                    "DIM (-k) cannot be greater than the number of PCs in the COORD_FILE (DIM={}, PCs={}).",
                    self.dim, pcs
                ));
            }
        }
        if let ComponentSelection::Fixed(dim_high) = self.components {
            if dim_high < self.dim {
                return invalid(format!(
                    "DIM_HIGH (-K) cannot be smaller than DIM (DIM_HIGH={}, DIM={}).",
                    dim_high, self.dim
                ));
            }
            if dim_high >= data.ref_size {
                return invalid(format!(
                    "DIM_HIGH (-K) must be smaller than REF_SIZE (DIM_HIGH={}, REF_SIZE={}).",
                    dim_high, data.ref_size
                ));
            }
            if dim_high >= data.shared_loci {
                return invalid(format!(
                    "DIM_HIGH (-K) must be smaller than the number of shared loci (DIM_HIGH={}, LOCI={}).",
                    dim_high, data.shared_loci
                ));
            }
        }
        if self.min_loci < 1 || self.min_loci > data.shared_loci {
            return invalid(format!(
                "MIN_LOCI (-l) must be between 1 and the number of shared loci (MIN_LOCI={}, LOCI={}).",
                self.min_loci, data.shared_loci
            ));
        }
        if self.min_loci <= self.dim {
            warn!(
                "DIM>=MIN_LOCI is found; DIM={}, MIN_LOCI={}. Resetting MIN_LOCI to DIM+1={}.",
                self.dim,
                self.min_loci,
                self.dim + 1
            );
            self.min_loci = self.dim + 1;
        }
        if !(self.convergence_threshold > 0.0) {
            return invalid(format!(
                "THRESHOLD (-t) must be a positive number, got {}.",
                self.convergence_threshold
            ));
        }
        if self.max_iterations < 1 {
            return invalid("MAX_ITER must be at least 1.".to_string());
        }
        if self.knn < 3 {
            return invalid(format!(
                "KNN_ZSCORE (--knn) must be an integer greater than 2, got {}.",
                self.knn
            ));
        }
        if self.knn > data.ref_size {
            return invalid(format!(
                "KNN_ZSCORE (--knn) cannot be greater than REF_SIZE (KNN={}, REF_SIZE={}).",
                self.knn, data.ref_size
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> DataDimensions {
        DataDimensions {
            ref_size: 50,
            shared_loci: 200,
            supplied_pcs: None,
        }
    }

    #[test]
    fn critical_value_table_matches_supported_levels() {
        assert_eq!(tracy_widom_critical_value(0.2), Some(-0.1653));
        assert_eq!(tracy_widom_critical_value(0.05), Some(0.9793));
        assert_eq!(tracy_widom_critical_value(0.001), Some(3.2712));
        assert_eq!(tracy_widom_critical_value(0.02), None);
    }

    #[test]
    fn dim_high_zero_selects_tracy_widom() {
        let sel = ComponentSelection::from_dim_high(0, 0.01).unwrap();
        assert_eq!(
            sel,
            ComponentSelection::TracyWidom {
                alpha: 0.01,
                critical_value: 2.0233
            }
        );
        assert!(ComponentSelection::from_dim_high(0, 0.3).is_err());
        assert_eq!(
            ComponentSelection::from_dim_high(5, 0.3).unwrap(),
            ComponentSelection::Fixed(5)
        );
    }

    #[test]
    fn min_loci_not_above_dim_is_raised() {
        let settings = AnalysisSettings {
            dim: 4,
            min_loci: 3,
            ..AnalysisSettings::default()
        };
        let checked = settings.validated(&dims()).unwrap();
        assert_eq!(checked.min_loci, 5);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let too_many_neighbors = AnalysisSettings {
            knn: 51,
            ..AnalysisSettings::default()
        };
        assert!(too_many_neighbors.validated(&dims()).is_err());

        let dim_high_below_dim = AnalysisSettings {
            dim: 3,
            components: ComponentSelection::Fixed(2),
            ..AnalysisSettings::default()
        };
        assert!(dim_high_below_dim.validated(&dims()).is_err());

        let dim_above_supplied = AnalysisSettings {
            dim: 3,
            ..AnalysisSettings::default()
        };
        let with_coords = DataDimensions {
            supplied_pcs: Some(2),
            ..dims()
        };
        assert!(dim_above_supplied.validated(&with_coords).is_err());

        let bad_threshold = AnalysisSettings {
            convergence_threshold: 0.0,
            ..AnalysisSettings::default()
        };
        assert!(bad_threshold.validated(&dims()).is_err());
    }

    #[test]
    fn scale_mode_codes_round_trip() {
        assert_eq!(ScaleMode::from_code(0).unwrap(), ScaleMode::MaximizeSimilarity);
        assert_eq!(ScaleMode::from_code(1).unwrap().code(), 1);
        assert!(ScaleMode::from_code(2).is_err());
    }
}
