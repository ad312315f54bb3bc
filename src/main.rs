// main.rs

use anyhow::{anyhow, Error, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Instant;

use trace_ancestry::cli::{self, CliArgs, RunConfig};
use trace_ancestry::config::DataDimensions;
use trace_ancestry::covariance::reference_covariance;
use trace_ancestry::logging::{log_path_for, LogMirror};
use trace_ancestry::normalize::normalize_reference;
use trace_ancestry::output::{self, ProjectionWriter};
use trace_ancestry::reference::{run_reference_pca, supplied_coordinates};
use trace_ancestry::sampling::{mask_genotypes, subsample_reference};
use trace_ancestry::sites::{match_shared_loci, read_exclusion_list, read_sites, site_path_for};
use trace_ancestry::table::{self, GenotypeRows};
use trace_ancestry::{LapackBackend, PlacementOutcome, ReferencePanel, StudyAnalyzer};

const PROGRESS_INTERVAL: usize = 100;

fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    let log_mirror = LogMirror::new();
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Pipe(Box::new(log_mirror.clone())))
        .init();

    info!(
        "Starting trace-ancestry {} ({} build)",
        env!("CARGO_PKG_VERSION"),
        env!("TRACE_BUILD_PROFILE")
    );

    let param_values = cli::load_param_file(&cli_args)?;
    let config = RunConfig::resolve(&cli_args, &param_values)?;
    output::ensure_output_dir(&config.out_prefix)?;
    let log_path = log_path_for(&config.out_prefix);
    log_mirror.attach(&log_path)?;
    info!("Log messages are also written to {}", log_path.display());

    info!("Using {} threads for parallel operations.", config.threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()?;

    // One stream for every random choice: trim, then subsample, then mask.
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    // --- 1. Check input tables and match loci ---
    let study_shape = table::scan_genotype_table(&config.study_file)?;
    let study_sites = read_sites(&site_path_for(&config.study_file))?;
    if study_sites.len() != study_shape.loci {
        return Err(anyhow!(
            "Number of loci doesn't match in the site file ({}) and {} ({}).",
            study_sites.len(),
            config.study_file.display(),
            study_shape.loci
        ));
    }
    let ref_shape = table::scan_genotype_table(&config.geno_file)?;
    let ref_sites = read_sites(&site_path_for(&config.geno_file))?;
    if ref_sites.len() != ref_shape.loci {
        return Err(anyhow!(
            "Number of loci doesn't match in the site file ({}) and {} ({}).",
            ref_sites.len(),
            config.geno_file.display(),
            ref_shape.loci
        ));
    }

    let exclude = match &config.exclude_list {
        Some(path) => read_exclusion_list(path)?,
        None => HashSet::new(),
    };
    let shared = match_shared_loci(&study_sites, &ref_sites, &exclude, config.trim_prop, &mut rng);
    if shared.is_empty() {
        return Err(anyhow!("No shared loci are left for the analysis."));
    }

    let supplied_pcs = match &config.coord_file {
        Some(path) => {
            let (individuals, pcs) = table::coordinate_table_shape(path)?;
            if individuals != ref_shape.individuals {
                return Err(anyhow!(
                    "Number of individuals in {} ({}) is not the same as in {} ({}).",
                    path.display(),
                    individuals,
                    config.geno_file.display(),
                    ref_shape.individuals
                ));
            }
            Some(pcs)
        }
        None => None,
    };

    // --- 2. Resolve data-dependent parameters ---
    let ref_size = match config.ref_size {
        Some(n) if n > ref_shape.individuals => {
            warn!(
                "REF_SIZE>REF_INDS is found; REF_SIZE={}, REF_INDS={}. Resetting REF_SIZE to {}.",
                n, ref_shape.individuals, ref_shape.individuals
            );
            ref_shape.individuals
        }
        Some(n) => n,
        None => ref_shape.individuals,
    };
    if config.first_ind > study_shape.individuals {
        return Err(anyhow!(
            "FIRST_IND (-x) is greater than the number of study individuals (FIRST_IND={}, INDS={}).",
            config.first_ind,
            study_shape.individuals
        ));
    }
    let last_ind = config
        .last_ind
        .map_or(study_shape.individuals, |last| last.min(study_shape.individuals));

    let settings = config.analysis_settings()?.validated(&DataDimensions {
        ref_size,
        shared_loci: shared.len(),
        supplied_pcs,
    })?;
    config.log_summary(&settings, ref_size, last_ind);

    // --- 3. Reference panel ---
    let ref_rows = subsample_reference(ref_shape.individuals, ref_size, &mut rng);
    if ref_size < ref_shape.individuals {
        info!("Randomly selected {} reference individuals (-N).", ref_size);
    }
    info!("Reading reference genotype data...");
    let (ref_ids, ref_genotypes) =
        table::read_reference_rows(&config.geno_file, &ref_rows, &shared.reference_columns)?;

    info!("Calculating reference covariance matrix...");
    let normalized = normalize_reference(ref_genotypes);
    let covariance = reference_covariance(&normalized.genotypes);

    let backend = LapackBackend;
    let coordinates = match &config.coord_file {
        Some(path) => {
            info!("Reading reference PCA coordinates from {}", path.display());
            let coords = table::read_coordinate_table(path, &ref_rows, &ref_ids)?;
            supplied_coordinates(coords, ref_size, settings.dim)?
        }
        None => {
            info!("Performing PCA on reference individuals...");
            let pca = run_reference_pca(&covariance, settings.dim, &backend)?;
            output::write_reference_coordinates(&config.out_prefix, &ref_ids, &pca.coordinates)?;
            output::write_variance_explained(&config.out_prefix, &pca.variance_explained)?;
            pca.coordinates
        }
    };
    let panel = ReferencePanel::from_parts(normalized, covariance, coordinates)?;

    // --- 4. Study individuals ---
    info!("Analyzing study individuals...");
    let analyzer = StudyAnalyzer::new(&panel, &settings, &backend)?;
    let mut writer = ProjectionWriter::create(&config.out_prefix, settings.dim)?;
    let mut study_rows = GenotypeRows::open(&config.study_file, Some(shared.study_columns.clone()))?;
    for _ in 1..config.first_ind {
        study_rows.skip_row()?;
    }

    let total = last_ind - config.first_ind + 1;
    let pb_style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} individuals ({percent}%) ETA: {eta}",
        )
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?
        .progress_chars("=> ");
    let pb = ProgressBar::new(total as u64).with_style(pb_style);

    let (mut placed, mut insufficient, mut failed, mut not_converged) = (0usize, 0usize, 0usize, 0usize);
    for index in config.first_ind..=last_ind {
        let mut row = study_rows.next_row()?.ok_or_else(|| {
            anyhow!(
                "{} ended before study individual {}.",
                config.study_file.display(),
                index
            )
        })?;
        mask_genotypes(&mut row.genotypes, config.mask_prop, &mut rng);
        let genotypes = ndarray::Array1::from(row.genotypes);
        let placement = analyzer.analyze(genotypes.view(), &row.id.indiv_id)?;
        match &placement.outcome {
            PlacementOutcome::Placed(aligned) => {
                placed += 1;
                if !aligned.converged {
                    not_converged += 1;
                }
            }
            PlacementOutcome::InsufficientLoci => insufficient += 1,
            PlacementOutcome::AlignmentFailed { .. } => failed += 1,
        }
        writer.write_record(&row.id, &placement)?;
        pb.inc(1);
        if index % PROGRESS_INTERVAL == 0 {
            info!("Progress: finished analysis of individual {}.", index);
        }
    }
    pb.finish_and_clear();
    let records = writer.finish()?;
    info!(
        "Procrustean PCA coordinates of {} individuals are output to '{}.ProPC.coord'.",
        records, config.out_prefix
    );
    info!(
        "{} placed ({} without convergence), {} with too few loci, {} failed alignments.",
        placed, not_converged, insufficient, failed
    );

    info!(
        "trace-ancestry finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}
