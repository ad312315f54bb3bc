//! Tab-delimited result files.

use crate::pipeline::{Placement, PlacementOutcome};
use crate::table::SampleId;
use anyhow::{anyhow, Result};
use log::info;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const NA: &str = "NA";

fn create_output_file(prefix: &str, suffix: &str) -> Result<BufWriter<File>> {
    let filename = format!("{}.{}", prefix, suffix);
    File::create(&filename)
        .map(BufWriter::new)
        .map_err(|e| anyhow!("Failed to create output file {}: {}", filename, e))
}

/// Creates the directory part of `prefix` if it does not exist yet.
pub fn ensure_output_dir(prefix: &str) -> Result<()> {
    if let Some(parent) = Path::new(prefix).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create output directory {}: {}", parent.display(), e))?;
            info!("Created output directory: {}", parent.display());
        }
    }
    Ok(())
}

fn write_pc_header<W: Write>(writer: &mut W, dim: usize) -> Result<()> {
    for i in 1..=dim {
        write!(writer, "\tPC{}", i)?;
    }
    writeln!(writer)?;
    Ok(())
}

/// `<prefix>.RefPC.coord`: reference PCA coordinates.
pub fn write_reference_coordinates(prefix: &str, ids: &[SampleId], coordinates: &Array2<f64>) -> Result<()> {
    if ids.len() != coordinates.nrows() {
        return Err(anyhow!(
            "{} reference identifiers for {} coordinate rows.",
            ids.len(),
            coordinates.nrows()
        ));
    }
    let mut writer = create_output_file(prefix, "RefPC.coord")?;
    write!(writer, "popID\tindivID")?;
    write_pc_header(&mut writer, coordinates.ncols())?;
    for (id, row) in ids.iter().zip(coordinates.outer_iter()) {
        write!(writer, "{}\t{}", id.pop_id, id.indiv_id)?;
        for v in row.iter() {
            write!(writer, "\t{:.6}", v)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    info!("Reference PCA coordinates are output to '{}.RefPC.coord'.", prefix);
    Ok(())
}

/// `<prefix>.RefPC.var`: percent variance explained per reference PC.
pub fn write_variance_explained(prefix: &str, variance_explained: &[f64]) -> Result<()> {
    let mut writer = create_output_file(prefix, "RefPC.var")?;
    writeln!(writer, "PC\tVariance(%)")?;
    for (i, v) in variance_explained.iter().enumerate() {
        writeln!(writer, "{}\t{:.6}", i + 1, v)?;
    }
    writer.flush()?;
    info!("Variances explained by PCs are output to '{}.RefPC.var'.", prefix);
    Ok(())
}

/// `<prefix>.ProPC.coord`, written one record at a time in input order.
pub struct ProjectionWriter<W: Write> {
    writer: W,
    dim: usize,
    records: usize,
}

impl ProjectionWriter<BufWriter<File>> {
    pub fn create(prefix: &str, dim: usize) -> Result<Self> {
        Self::new(create_output_file(prefix, "ProPC.coord")?, dim)
    }
}

impl<W: Write> ProjectionWriter<W> {
    pub fn new(mut writer: W, dim: usize) -> Result<Self> {
        write!(writer, "popID\tindivID\tL\tK\tt\tZ")?;
        write_pc_header(&mut writer, dim)?;
        Ok(Self {
            writer,
            dim,
            records: 0,
        })
    }

    pub fn write_record(&mut self, id: &SampleId, placement: &Placement) -> Result<()> {
        let w = &mut self.writer;
        write!(w, "{}\t{}\t{}", id.pop_id, id.indiv_id, placement.loci_used)?;
        match &placement.outcome {
            PlacementOutcome::Placed(aligned) => {
                write!(w, "\t{}\t{:.6}", aligned.dimensions, aligned.similarity)?;
                match aligned.zscore {
                    Some(z) => write!(w, "\t{:.6}", z)?,
                    None => write!(w, "\t{}", NA)?,
                }
                for v in aligned.coordinates.iter() {
                    write!(w, "\t{:.6}", v)?;
                }
            }
            PlacementOutcome::AlignmentFailed { dimensions } => {
                write!(w, "\t{}\t{}\t{}", dimensions, NA, NA)?;
                for _ in 0..self.dim {
                    write!(w, "\t{}", NA)?;
                }
            }
            PlacementOutcome::InsufficientLoci => {
                write!(w, "\t{}\t{}\t{}", NA, NA, NA)?;
                for _ in 0..self.dim {
                    write!(w, "\t{}", NA)?;
                }
            }
        }
        writeln!(w)?;
        self.records += 1;
        Ok(())
    }

    /// Flushes and returns the number of records written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.records)
    }
}
