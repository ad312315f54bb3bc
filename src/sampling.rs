//! Seeded random choices: reference subsampling and study-locus masking.

use crate::config::MISSING_GENOTYPE;
use rand::seq::index;
use rand::Rng;

/// Row indices of the reference individuals to analyse, ascending.
///
/// All rows when `ref_size >= ref_inds`; otherwise `ref_size` distinct rows
/// drawn from `rng`.
pub fn subsample_reference<R: Rng>(ref_inds: usize, ref_size: usize, rng: &mut R) -> Vec<usize> {
    if ref_size >= ref_inds {
        return (0..ref_inds).collect();
    }
    let mut rows = index::sample(rng, ref_inds, ref_size).into_vec();
    rows.sort_unstable();
    rows
}

/// Sets each observed genotype to missing with probability `proportion`.
/// Returns the number of loci masked. Already-missing loci do not consume a
/// draw.
pub fn mask_genotypes<R: Rng>(genotypes: &mut [f64], proportion: f64, rng: &mut R) -> usize {
    if proportion <= 0.0 {
        return 0;
    }
    let mut masked = 0;
    for g in genotypes.iter_mut().filter(|g| **g != MISSING_GENOTYPE) {
        if rng.random::<f64>() < proportion {
            *g = MISSING_GENOTYPE;
            masked += 1;
        }
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn subsample_is_sorted_distinct_and_seeded() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rows = subsample_reference(100, 20, &mut rng);
        assert_eq!(rows.len(), 20);
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
        assert!(rows.iter().all(|&r| r < 100));

        let mut again = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(subsample_reference(100, 20, &mut again), rows);
    }

    #[test]
    fn full_reference_is_kept_in_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(subsample_reference(5, 5, &mut rng), vec![0, 1, 2, 3, 4]);
        assert_eq!(subsample_reference(5, 9, &mut rng), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn masking_only_touches_observed_loci() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut genotypes = vec![1.0; 1000];
        genotypes[0] = MISSING_GENOTYPE;
        let masked = mask_genotypes(&mut genotypes, 0.25, &mut rng);
        let missing = genotypes.iter().filter(|&&g| g == MISSING_GENOTYPE).count();
        assert_eq!(missing, masked + 1);
        assert!(masked > 180 && masked < 320, "masked {}", masked);

        let mut untouched = vec![2.0; 10];
        assert_eq!(mask_genotypes(&mut untouched, 0.0, &mut rng), 0);
        assert!(untouched.iter().all(|&g| g == 2.0));
    }
}
