use crate::config::MISSING_GENOTYPE;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};

/// Per-locus standardization parameters derived from the reference panel.
///
/// Computed once and reused unchanged for every study individual.
#[derive(Debug, Clone)]
pub struct LocusStandardization {
    pub means: Array1<f64>,
    pub std_devs: Array1<f64>,
}

/// Standardized reference genotypes plus the parameters used to produce them.
#[derive(Debug, Clone)]
pub struct NormalizedReference {
    /// Individuals x loci; monomorphic loci are all zero.
    pub genotypes: Array2<f64>,
    pub standardization: LocusStandardization,
}

#[inline]
fn is_missing(value: f64) -> bool {
    value == MISSING_GENOTYPE
}

/// Mean-imputes and standardizes one locus in place, returning `(mean, sd)`.
///
/// The raw mean includes the sentinel entries; it is then corrected with
/// `(mean * N + 9 * M) / (N - M)`, which removes the sentinel's contribution.
fn normalize_locus(mut column: ArrayViewMut1<f64>) -> (f64, f64) {
    let n = column.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let raw_mean = column.sum() / n as f64;
    let missing = column.iter().filter(|&&g| is_missing(g)).count();

    let mean = if missing == 0 {
        raw_mean
    } else if missing == n {
        // No observed genotypes; the locus carries no information.
        column.fill(0.0);
        0.0
    } else {
        let adjusted = (raw_mean * n as f64 + 9.0 * missing as f64) / (n - missing) as f64;
        column.mapv_inplace(|g| if is_missing(g) { adjusted } else { g });
        adjusted
    };

    let std_dev = sample_std_dev(column.view(), mean);
    if std_dev == 0.0 {
        column.fill(0.0);
    } else {
        column.mapv_inplace(|g| (g - mean) / std_dev);
    }
    (mean, std_dev)
}

/// Sample standard deviation (divisor `n - 1`) around a known mean.
fn sample_std_dev(values: ArrayView1<f64>, mean: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|&v| (v - mean).powi(2)).sum();
    (sum_sq / (n - 1) as f64).sqrt()
}

/// Standardizes the reference genotype matrix (individuals x loci) locus by
/// locus, in parallel over loci. Deterministic for a given input.
pub fn normalize_reference(mut genotypes: Array2<f64>) -> NormalizedReference {
    let stats: Vec<(f64, f64)> = genotypes
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .map(normalize_locus)
        .collect();

    let means = stats.iter().map(|&(m, _)| m).collect::<Array1<f64>>();
    let std_devs = stats.iter().map(|&(_, s)| s).collect::<Array1<f64>>();
    NormalizedReference {
        genotypes,
        standardization: LocusStandardization { means, std_devs },
    }
}

impl LocusStandardization {
    pub fn num_loci(&self) -> usize {
        self.means.len()
    }

    /// Deviation vector `(g - mean) / sd` for one study individual; zero at
    /// missing and monomorphic loci.
    pub fn standardize_individual(&self, genotypes: ArrayView1<f64>) -> Array1<f64> {
        let mut deviations = Array1::<f64>::zeros(genotypes.len());
        for (j, &g) in genotypes.iter().enumerate() {
            let sd = self.std_devs[j];
            if !is_missing(g) && sd != 0.0 {
                deviations[j] = (g - self.means[j]) / sd;
            }
        }
        deviations
    }
}
