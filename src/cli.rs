//! Command line and parameter file handling.

use crate::config::{
    AnalysisSettings, ComponentSelection, ScaleMode, DEFAULT_ALPHA, DEFAULT_DIM, DEFAULT_DIM_HIGH, DEFAULT_KNN,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_LOCI, DEFAULT_THRESHOLD,
};
use crate::error::TraceError;
use anyhow::{anyhow, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Parameter file read from the working directory when `-p` is not given.
pub const DEFAULT_PARAM_FILE: &str = "trace.conf";

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Places study individuals into a reference PCA space by projection Procrustes analysis.",
    long_about = None,
    propagate_version = true
)]
pub struct CliArgs {
    /// Parameter file (`KEY value` lines); command line values take precedence.
    #[arg(short = 'p', long = "param-file")]
    pub param_file: Option<PathBuf>,

    /// Study genotype table.
    #[arg(short = 's', long = "study-file")]
    pub study_file: Option<PathBuf>,

    /// Reference genotype table.
    #[arg(short = 'g', long = "geno-file")]
    pub geno_file: Option<PathBuf>,

    /// Reference PCA coordinates; PCA is computed when omitted.
    #[arg(short = 'c', long = "coord-file")]
    pub coord_file: Option<PathBuf>,

    #[arg(short = 'o', long = "out")]
    pub out_prefix: Option<String>,

    #[arg(short = 'k', long = "dim")]
    pub dim: Option<usize>,

    /// 0 selects the number of informative PCs per individual (Tracy-Widom).
    #[arg(short = 'K', long = "dim-high")]
    pub dim_high: Option<usize>,

    #[arg(short = 'l', long = "min-loci")]
    pub min_loci: Option<usize>,

    #[arg(short = 'N', long = "ref-size")]
    pub ref_size: Option<usize>,

    /// 1-based index of the first study individual to analyse.
    #[arg(short = 'x', long = "first-ind")]
    pub first_ind: Option<usize>,

    #[arg(short = 'y', long = "last-ind")]
    pub last_ind: Option<usize>,

    #[arg(short = 'a', long = "alpha")]
    pub alpha: Option<f64>,

    #[arg(short = 't', long = "threshold")]
    pub threshold: Option<f64>,

    #[arg(long = "max-iter")]
    pub max_iter: Option<usize>,

    #[arg(short = 'M', long = "trim-prop")]
    pub trim_prop: Option<f64>,

    #[arg(short = 'm', long = "mask-prop")]
    pub mask_prop: Option<f64>,

    /// Whitespace-separated SNP IDs to exclude.
    #[arg(long = "exclude")]
    pub exclude_list: Option<PathBuf>,

    /// Procrustes scale: 0 maximizes similarity, 1 matches variance.
    #[arg(long = "rho")]
    pub procrustes_scale: Option<u8>,

    #[arg(long = "knn")]
    pub knn: Option<usize>,

    #[arg(long = "seed")]
    pub seed: Option<u64>,

    #[arg(long)]
    pub threads: Option<usize>,

    #[arg(long, default_value = "Info")]
    pub log_level: String,
}

/// Fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub study_file: PathBuf,
    pub geno_file: PathBuf,
    pub coord_file: Option<PathBuf>,
    pub out_prefix: String,
    pub dim: usize,
    pub dim_high: usize,
    pub min_loci: usize,
    pub ref_size: Option<usize>,
    pub first_ind: usize,
    pub last_ind: Option<usize>,
    pub alpha: f64,
    pub threshold: f64,
    pub max_iter: usize,
    pub trim_prop: f64,
    pub mask_prop: f64,
    pub exclude_list: Option<PathBuf>,
    pub scale_mode: ScaleMode,
    pub knn: usize,
    pub seed: u64,
    pub threads: usize,
}

/// `KEY value` pairs; `#` starts a comment, a key without a value stays
/// unset and unknown keys are ignored with a warning.
pub fn parse_param_file(text: &str, path: &Path) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for (line_idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            debug!("Line {} of {} leaves '{}' unset.", line_idx + 1, path.display(), line);
            continue;
        };
        if !PARAM_KEYS.contains(&key) {
            warn!("Unknown parameter '{}' in {} is ignored.", key, path.display());
            continue;
        }
        if values.insert(key.to_string(), value.to_string()).is_some() {
            warn!("Parameter '{}' is given more than once in {}; using the last value.", key, path.display());
        }
    }
    Ok(values)
}

const PARAM_KEYS: [&str; 20] = [
    "STUDY_FILE",
    "GENO_FILE",
    "COORD_FILE",
    "OUT_PREFIX",
    "DIM",
    "DIM_HIGH",
    "MIN_LOCI",
    "REF_SIZE",
    "FIRST_IND",
    "LAST_IND",
    "ALPHA",
    "THRESHOLD",
    "MAX_ITER",
    "TRIM_PROP",
    "MASK_PROP",
    "EXCLUDE_LIST",
    "PROCRUSTES_SCALE",
    "KNN_ZSCORE",
    "RANDOM_SEED",
    "NUM_THREADS",
];

const PARAM_TEMPLATE: &str = "\
# Parameter file for trace-ancestry. Lines are `KEY value`; `#` starts a comment.
# Command line options override the values given here.

STUDY_FILE        # Study genotype table (required)
GENO_FILE         # Reference genotype table (required)
COORD_FILE        # Reference PCA coordinates (PCA is computed when omitted)
OUT_PREFIX        # Prefix of output files (default trace)
DIM               # Number of PCs to compute (default 2)
DIM_HIGH          # Number of informative PCs per study individual; 0 selects it automatically (default 20)
MIN_LOCI          # Minimum number of non-missing loci in a study individual (default 100)
REF_SIZE          # Number of reference individuals to sample (default all)
FIRST_IND         # Index of the first study individual to analyse (default 1)
LAST_IND          # Index of the last study individual to analyse (default last)
ALPHA             # Significance level for automatic DIM_HIGH: 0.2, 0.15, 0.1, 0.05, 0.01, 0.005 or 0.001 (default 0.1)
THRESHOLD         # Convergence threshold of projection Procrustes (default 1e-6)
MAX_ITER          # Maximum projection Procrustes iterations (default 10000)
TRIM_PROP         # Proportion of shared loci randomly dropped, in [0, 1) (default 0)
MASK_PROP         # Proportion of loci randomly masked in each study individual, in [0, 1) (default 0)
EXCLUDE_LIST      # File of SNP IDs to exclude
PROCRUSTES_SCALE  # 0 maximizes similarity, 1 matches variance (default 0)
KNN_ZSCORE        # Number of nearest reference individuals for the Z score (default 10)
RANDOM_SEED       # Seed of the random number generator (default 0)
NUM_THREADS       # Number of worker threads (default all CPUs)
";

/// Writes a commented parameter file template.
pub fn write_param_template(path: &Path) -> Result<()> {
    std::fs::write(path, PARAM_TEMPLATE)
        .map_err(|e| anyhow!("Failed to write parameter template {}: {}", path.display(), e))?;
    warn!(
        "Parameter file {} was not found; a template has been written there.",
        path.display()
    );
    Ok(())
}

fn file_value<T: FromStr>(file: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match file.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid value '{}' for {} in the parameter file.", raw, key)),
    }
}

fn pick<T: FromStr>(cli: Option<T>, file: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match cli {
        Some(v) => Ok(Some(v)),
        None => file_value(file, key),
    }
}

/// Loads the parameter file named by `-p`, or `trace.conf` when present.
pub fn load_param_file(args: &CliArgs) -> Result<HashMap<String, String>> {
    let (path, explicit) = match &args.param_file {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from(DEFAULT_PARAM_FILE), false),
    };
    if !path.exists() {
        if explicit {
            write_param_template(&path)?;
        }
        return Ok(HashMap::new());
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("Failed to read parameter file {}: {}", path.display(), e))?;
    info!("Reading parameters from {}", path.display());
    parse_param_file(&text, &path)
}

impl RunConfig {
    /// Merges command line values over parameter file values and applies
    /// defaults. Checks that do not depend on the data happen here.
    pub fn resolve(args: &CliArgs, file: &HashMap<String, String>) -> Result<Self> {
        let study_file = pick(args.study_file.clone(), file, "STUDY_FILE")?
            .ok_or_else(|| anyhow!("STUDY_FILE (-s) is not specified."))?;
        let geno_file = pick(args.geno_file.clone(), file, "GENO_FILE")?
            .ok_or_else(|| anyhow!("GENO_FILE (-g) is not specified."))?;
        let scale_code: u8 = pick(args.procrustes_scale, file, "PROCRUSTES_SCALE")?.unwrap_or(0);

        let config = Self {
            study_file,
            geno_file,
            coord_file: pick(args.coord_file.clone(), file, "COORD_FILE")?,
            out_prefix: pick(args.out_prefix.clone(), file, "OUT_PREFIX")?.unwrap_or_else(|| "trace".to_string()),
            dim: pick(args.dim, file, "DIM")?.unwrap_or(DEFAULT_DIM),
            dim_high: pick(args.dim_high, file, "DIM_HIGH")?.unwrap_or(DEFAULT_DIM_HIGH),
            min_loci: pick(args.min_loci, file, "MIN_LOCI")?.unwrap_or(DEFAULT_MIN_LOCI),
            ref_size: pick(args.ref_size, file, "REF_SIZE")?,
            first_ind: pick(args.first_ind, file, "FIRST_IND")?.unwrap_or(1),
            last_ind: pick(args.last_ind, file, "LAST_IND")?,
            alpha: pick(args.alpha, file, "ALPHA")?.unwrap_or(DEFAULT_ALPHA),
            threshold: pick(args.threshold, file, "THRESHOLD")?.unwrap_or(DEFAULT_THRESHOLD),
            max_iter: pick(args.max_iter, file, "MAX_ITER")?.unwrap_or(DEFAULT_MAX_ITERATIONS),
            trim_prop: pick(args.trim_prop, file, "TRIM_PROP")?.unwrap_or(0.0),
            mask_prop: pick(args.mask_prop, file, "MASK_PROP")?.unwrap_or(0.0),
            exclude_list: pick(args.exclude_list.clone(), file, "EXCLUDE_LIST")?,
            scale_mode: ScaleMode::from_code(scale_code)?,
            knn: pick(args.knn, file, "KNN_ZSCORE")?.unwrap_or(DEFAULT_KNN),
            seed: pick(args.seed, file, "RANDOM_SEED")?.unwrap_or(0),
            threads: pick(args.threads, file, "NUM_THREADS")?.unwrap_or_else(num_cpus::get),
        };
        config.check_static()?;
        Ok(config)
    }

    fn check_static(&self) -> Result<(), TraceError> {
        let invalid = |msg: String| Err(TraceError::InvalidConfig(msg));
        if !(0.0..1.0).contains(&self.trim_prop) {
            return invalid(format!("TRIM_PROP (-M) must be in [0, 1), got {}.", self.trim_prop));
        }
        if !(0.0..1.0).contains(&self.mask_prop) {
            return invalid(format!("MASK_PROP (-m) must be in [0, 1), got {}.", self.mask_prop));
        }
        if self.first_ind < 1 {
            return invalid("FIRST_IND (-x) must be a positive integer.".to_string());
        }
        if let Some(last) = self.last_ind {
            if last < self.first_ind {
                return invalid(format!(
                    "LAST_IND (-y) cannot be smaller than FIRST_IND (-x) (FIRST_IND={}, LAST_IND={}).",
                    self.first_ind, last
                ));
            }
        }
        if self.threads < 1 {
            return invalid("NUM_THREADS must be at least 1.".to_string());
        }
        if self.ref_size == Some(0) {
            return invalid("REF_SIZE (-N) must be a positive integer.".to_string());
        }
        ComponentSelection::from_dim_high(self.dim_high, self.alpha)?;
        Ok(())
    }

    /// Settings for the numerical core; validated against the data later.
    pub fn analysis_settings(&self) -> Result<AnalysisSettings, TraceError> {
        Ok(AnalysisSettings {
            dim: self.dim,
            components: ComponentSelection::from_dim_high(self.dim_high, self.alpha)?,
            min_loci: self.min_loci,
            scale_mode: self.scale_mode,
            knn: self.knn,
            max_iterations: self.max_iter,
            convergence_threshold: self.threshold,
        })
    }

    /// Logs the parameter values used in execution.
    pub fn log_summary(&self, settings: &AnalysisSettings, ref_size: usize, last_ind: usize) {
        info!("Parameter values used in execution:");
        info!("  STUDY_FILE (-s)        {}", self.study_file.display());
        info!("  GENO_FILE (-g)         {}", self.geno_file.display());
        if let Some(coord) = &self.coord_file {
            info!("  COORD_FILE (-c)        {}", coord.display());
        }
        info!("  OUT_PREFIX (-o)        {}", self.out_prefix);
        info!("  DIM (-k)               {}", settings.dim);
        match settings.components {
            ComponentSelection::Fixed(k) => info!("  DIM_HIGH (-K)          {}", k),
            ComponentSelection::TracyWidom { alpha, .. } => {
                info!("  DIM_HIGH (-K)          0 (automatic)");
                info!("  ALPHA (-a)             {}", alpha);
            }
        }
        info!("  MIN_LOCI (-l)          {}", settings.min_loci);
        info!("  REF_SIZE (-N)          {}", ref_size);
        info!("  FIRST_IND (-x)         {}", self.first_ind);
        info!("  LAST_IND (-y)          {}", last_ind);
        info!("  THRESHOLD (-t)         {}", settings.convergence_threshold);
        info!("  MAX_ITER (--max-iter)  {}", settings.max_iterations);
        if self.trim_prop > 0.0 {
            info!("  TRIM_PROP (-M)         {}", self.trim_prop);
        }
        if self.mask_prop > 0.0 {
            info!("  MASK_PROP (-m)         {}", self.mask_prop);
        }
        if let Some(ex) = &self.exclude_list {
            info!("  EXCLUDE_LIST (--exclude) {}", ex.display());
        }
        info!("  PROCRUSTES_SCALE (--rho) {}", settings.scale_mode.code());
        info!("  KNN_ZSCORE (--knn)     {}", settings.knn);
        info!("  RANDOM_SEED (--seed)   {}", self.seed);
        info!("  NUM_THREADS (--threads) {}", self.threads);
    }
}
