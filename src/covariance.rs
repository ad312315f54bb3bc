//! Reference kinship matrix and its per-individual augmentation.

use crate::error::TraceError;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};

/// `M = G * G^T` for standardized reference genotypes (individuals x loci).
pub fn reference_covariance(normalized: &Array2<f64>) -> Array2<f64> {
    normalized.dot(&normalized.t())
}

/// Loci of one study individual split by missingness.
#[derive(Debug, Clone, Default)]
pub struct LocusPartition {
    pub missing: Vec<usize>,
    pub present: Vec<usize>,
}

impl LocusPartition {
    pub fn from_genotypes(genotypes: ArrayView1<f64>, missing_value: f64) -> Self {
        let mut partition = Self::default();
        for (j, &g) in genotypes.iter().enumerate() {
            if g == missing_value {
                partition.missing.push(j);
            } else {
                partition.present.push(j);
            }
        }
        partition
    }

    pub fn num_present(&self) -> usize {
        self.present.len()
    }
}

/// Reference covariance restricted to the loci an individual was observed at.
pub trait PresentLociCovariance {
    fn name(&self) -> &'static str;

    fn compute(
        &self,
        normalized: &Array2<f64>,
        full_covariance: &Array2<f64>,
        partition: &LocusPartition,
    ) -> Array2<f64>;
}

/// `M - G_missing * G_missing^T`; cheap when few loci are missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtractMissing;

impl PresentLociCovariance for SubtractMissing {
    fn name(&self) -> &'static str {
        "subtract-missing"
    }

    fn compute(
        &self,
        normalized: &Array2<f64>,
        full_covariance: &Array2<f64>,
        partition: &LocusPartition,
    ) -> Array2<f64> {
        if partition.missing.is_empty() {
            return full_covariance.clone();
        }
        let sub = normalized.select(Axis(1), &partition.missing);
        full_covariance - &sub.dot(&sub.t())
    }
}

/// `G_present * G_present^T`; cheap when most loci are missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPresent;

impl PresentLociCovariance for DirectPresent {
    fn name(&self) -> &'static str {
        "direct-present"
    }

    fn compute(
        &self,
        normalized: &Array2<f64>,
        _full_covariance: &Array2<f64>,
        partition: &LocusPartition,
    ) -> Array2<f64> {
        let sub = normalized.select(Axis(1), &partition.present);
        sub.dot(&sub.t())
    }
}

/// Picks the subtraction path when fewer loci are missing than present.
pub fn select_strategy(partition: &LocusPartition) -> &'static dyn PresentLociCovariance {
    if partition.missing.len() < partition.present.len() {
        &SubtractMissing
    } else {
        &DirectPresent
    }
}

/// Builds the (REF_SIZE+1) x (REF_SIZE+1) augmented matrix for one individual.
///
/// `deviations` must be zero at the individual's missing loci, so the new
/// row `D * G^T` and the self-covariance `D * D^T` only see present loci.
pub fn augment(
    normalized: &Array2<f64>,
    full_covariance: &Array2<f64>,
    deviations: &Array1<f64>,
    partition: &LocusPartition,
) -> Result<Array2<f64>, TraceError> {
    let (ref_size, loci) = normalized.dim();
    if deviations.len() != loci {
        return Err(TraceError::ShapeMismatch {
            context: "augmented covariance",
            expected: format!("{} loci", loci),
            found: format!("{} loci", deviations.len()),
        });
    }
    if full_covariance.dim() != (ref_size, ref_size) {
        return Err(TraceError::ShapeMismatch {
            context: "augmented covariance",
            expected: format!("{0}x{0} reference covariance", ref_size),
            found: format!("{}x{}", full_covariance.nrows(), full_covariance.ncols()),
        });
    }

    let block = select_strategy(partition).compute(normalized, full_covariance, partition);
    let cross = normalized.dot(deviations);
    let self_covariance = deviations.dot(deviations);

    let mut augmented = Array2::<f64>::zeros((ref_size + 1, ref_size + 1));
    augmented.slice_mut(s![..ref_size, ..ref_size]).assign(&block);
    augmented.slice_mut(s![ref_size, ..ref_size]).assign(&cross);
    augmented.slice_mut(s![..ref_size, ref_size]).assign(&cross);
    augmented[[ref_size, ref_size]] = self_covariance;
    Ok(augmented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MISSING_GENOTYPE;
    use crate::normalize::normalize_reference;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_panel(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.random_range(0..3) as f64)
    }

    fn brute_force_present_covariance(normalized: &Array2<f64>, present: &[usize]) -> Array2<f64> {
        let n = normalized.nrows();
        Array2::from_shape_fn((n, n), |(a, b)| {
            present
                .iter()
                .map(|&j| normalized[[a, j]] * normalized[[b, j]])
                .sum()
        })
    }

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn covariance_is_symmetric_gram_matrix() {
        let norm = normalize_reference(random_panel(8, 30, 1));
        let m = reference_covariance(&norm.genotypes);
        for a in 0..8 {
            for b in 0..8 {
                assert_abs_diff_eq!(m[[a, b]], m[[b, a]], epsilon = 1e-10);
                let direct: f64 = norm
                    .genotypes
                    .row(a)
                    .iter()
                    .zip(norm.genotypes.row(b).iter())
                    .map(|(x, y)| x * y)
                    .sum();
                assert_abs_diff_eq!(m[[a, b]], direct, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn both_strategies_match_brute_force() {
        let norm = normalize_reference(random_panel(10, 40, 2));
        let m = reference_covariance(&norm.genotypes);
        let partition = LocusPartition {
            missing: vec![0, 3, 7, 8, 21, 39],
            present: (0..40).filter(|j| ![0, 3, 7, 8, 21, 39].contains(j)).collect(),
        };
        let expected = brute_force_present_covariance(&norm.genotypes, &partition.present);
        assert_close(&SubtractMissing.compute(&norm.genotypes, &m, &partition), &expected);
        assert_close(&DirectPresent.compute(&norm.genotypes, &m, &partition), &expected);
    }

    #[test]
    fn strategy_follows_missingness_heuristic() {
        let dense = LocusPartition {
            missing: vec![1],
            present: vec![0, 2, 3],
        };
        assert_eq!(select_strategy(&dense).name(), "subtract-missing");
        let sparse = LocusPartition {
            missing: vec![0, 1],
            present: vec![2, 3],
        };
        assert_eq!(select_strategy(&sparse).name(), "direct-present");
    }

    #[test]
    fn complete_individual_keeps_reference_block() {
        let panel = random_panel(6, 25, 3);
        let norm = normalize_reference(panel.clone());
        let m = reference_covariance(&norm.genotypes);
        let study = panel.row(0).to_owned();
        let partition = LocusPartition::from_genotypes(study.view(), MISSING_GENOTYPE);
        let d = norm.standardization.standardize_individual(study.view());
        let aug = augment(&norm.genotypes, &m, &d, &partition).unwrap();
        assert_eq!(aug.slice(s![..6, ..6]), m);
        // a duplicate of individual 0 has the same covariance profile
        for b in 0..6 {
            assert_abs_diff_eq!(aug[[6, b]], m[[0, b]], epsilon = 1e-9);
            assert_abs_diff_eq!(aug[[b, 6]], m[[0, b]], epsilon = 1e-9);
        }
        assert_abs_diff_eq!(aug[[6, 6]], m[[0, 0]], epsilon = 1e-9);
    }

    #[test]
    fn fully_missing_individual_has_zero_row_and_column() {
        let norm = normalize_reference(random_panel(5, 12, 4));
        let m = reference_covariance(&norm.genotypes);
        let study = Array1::from_elem(12, MISSING_GENOTYPE);
        let partition = LocusPartition::from_genotypes(study.view(), MISSING_GENOTYPE);
        let d = norm.standardization.standardize_individual(study.view());
        let aug = augment(&norm.genotypes, &m, &d, &partition).unwrap();
        assert!(aug.row(5).iter().all(|&v| v == 0.0));
        assert!(aug.column(5).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn augmented_matrix_matches_brute_force_with_missing_loci() {
        let panel = random_panel(7, 30, 5);
        let norm = normalize_reference(panel.clone());
        let m = reference_covariance(&norm.genotypes);
        let mut study = panel.row(3).to_owned();
        for j in [2, 5, 11, 17] {
            study[j] = MISSING_GENOTYPE;
        }
        let partition = LocusPartition::from_genotypes(study.view(), MISSING_GENOTYPE);
        assert_eq!(partition.num_present(), 26);
        let d = norm.standardization.standardize_individual(study.view());
        let aug = augment(&norm.genotypes, &m, &d, &partition).unwrap();

        let mut extended = Array2::<f64>::zeros((8, 30));
        extended.slice_mut(s![..7, ..]).assign(&norm.genotypes);
        extended.row_mut(7).assign(&d);
        let expected = brute_force_present_covariance(&extended, &partition.present);
        assert_close(&aug, &expected);
    }
}
