//! Locus metadata and the shared-locus mapping between study and reference.

use crate::table::open_table;
use anyhow::{anyhow, Result};
use log::{info, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// One row of a `.site` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub chrom: String,
    pub pos: String,
    pub id: String,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl Site {
    /// `CHR:POS`, the key loci are matched on.
    pub fn key(&self) -> String {
        format!("{}:{}", self.chrom, self.pos)
    }

    fn alleles(&self) -> String {
        format!("{},{}", self.ref_allele, self.alt_allele)
    }
}

/// Site file belonging to a genotype table: `.geno` becomes `.site`,
/// `.geno.gz` becomes `.site.gz` when that exists and `.site` otherwise;
/// any other name gets `.site` appended.
pub fn site_path_for(geno_path: &Path) -> PathBuf {
    let name = geno_path.to_string_lossy();
    if let Some(stem) = name.strip_suffix(".geno.gz") {
        let gz = PathBuf::from(format!("{}.site.gz", stem));
        if gz.exists() {
            return gz;
        }
        return PathBuf::from(format!("{}.site", stem));
    }
    if let Some(stem) = name.strip_suffix(".geno") {
        return PathBuf::from(format!("{}.site", stem));
    }
    PathBuf::from(format!("{}.site", name))
}

/// Reads a site file: one header line, then `CHR POS ID REF ALT`.
pub fn read_sites(path: &Path) -> Result<Vec<Site>> {
    let mut sites = Vec::new();
    for (line_idx, line) in open_table(path)?.lines().enumerate().skip(1) {
        let line = line.map_err(|e| anyhow!("Error reading line {} of {}: {}", line_idx + 1, path.display(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        if fields.len() != 5 {
            return Err(anyhow!(
                "Incorrect number of columns in {} at line {}: found {}, expected 5 (CHR POS ID REF ALT).",
                path.display(),
                line_idx + 1,
                fields.len()
            ));
        }
        sites.push(Site {
            chrom: fields[0].to_string(),
            pos: fields[1].to_string(),
            id: fields[2].to_string(),
            ref_allele: fields[3].to_string(),
            alt_allele: fields[4].to_string(),
        });
    }
    info!("{} loci are detected in {}.", sites.len(), path.display());
    Ok(sites)
}

/// Whitespace-separated SNP identifiers to leave out of the analysis.
pub fn read_exclusion_list(path: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    for line in open_table(path)?.lines() {
        let line = line.map_err(|e| anyhow!("Error reading {}: {}", path.display(), e))?;
        ids.extend(line.split_whitespace().map(String::from));
    }
    info!("{} loci are listed in {}.", ids.len(), path.display());
    Ok(ids)
}

/// Column indices of the loci used in the analysis, in reference-site order.
#[derive(Debug, Clone, Default)]
pub struct SharedLoci {
    pub study_columns: Vec<usize>,
    pub reference_columns: Vec<usize>,
    pub allele_mismatches: usize,
    pub excluded: usize,
    pub trimmed: usize,
}

impl SharedLoci {
    pub fn len(&self) -> usize {
        self.reference_columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference_columns.is_empty()
    }

    /// Loci present in both datasets before any were dropped.
    pub fn total_shared(&self) -> usize {
        self.len() + self.allele_mismatches + self.excluded + self.trimmed
    }
}

/// Matches study and reference loci by `CHR:POS`.
///
/// A shared locus is dropped when its `REF,ALT` alleles differ, when its
/// reference ID is in `exclude`, or when a uniform draw falls below
/// `trim_prop`; checks happen in that order and only the last one draws
/// from `rng`.
pub fn match_shared_loci<R: Rng>(
    study: &[Site],
    reference: &[Site],
    exclude: &HashSet<String>,
    trim_prop: f64,
    rng: &mut R,
) -> SharedLoci {
    let study_index: HashMap<String, usize> = study
        .iter()
        .enumerate()
        .map(|(i, site)| (site.key(), i))
        .collect();

    let mut shared = SharedLoci::default();
    for (ref_col, site) in reference.iter().enumerate() {
        let key = site.key();
        let Some(&study_col) = study_index.get(&key) else {
            continue;
        };
        let study_alleles = study[study_col].alleles();
        let ref_alleles = site.alleles();
        if study_alleles != ref_alleles {
            warn!(
                "Two datasets have different alleles at locus [{}]: [{}] vs [{}].",
                key, ref_alleles, study_alleles
            );
            shared.allele_mismatches += 1;
        } else if exclude.contains(&site.id) {
            shared.excluded += 1;
        } else if trim_prop > 0.0 && rng.random::<f64>() < trim_prop {
            shared.trimmed += 1;
        } else {
            shared.study_columns.push(study_col);
            shared.reference_columns.push(ref_col);
        }
    }

    info!(
        "Identified {} loci shared by STUDY_FILE and GENO_FILE.",
        shared.total_shared()
    );
    if shared.allele_mismatches > 0 {
        info!(
            "Exclude {} loci that have different alleles in two datasets.",
            shared.allele_mismatches
        );
    }
    if shared.excluded > 0 {
        info!("Exclude {} loci given by the EXCLUDE_LIST.", shared.excluded);
    }
    if shared.trimmed > 0 {
        info!("Exclude {} random loci by the TRIM_PROP option.", shared.trimmed);
    }
    info!("The analysis will be based on the remaining {} shared loci.", shared.len());
    shared
}
