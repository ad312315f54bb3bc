//! Tab-delimited genotype and coordinate tables, optionally gzip-compressed.

use anyhow::{anyhow, Result};
use flate2::read::MultiGzDecoder;
use log::{debug, info};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Leading identifier columns in every genotype and coordinate table.
pub const ID_COLUMNS: usize = 2;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// `popID` / `indivID` pair identifying one individual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleId {
    pub pop_id: String,
    pub indiv_id: String,
}

/// Opens `path` for line reading, transparently decompressing gzip input.
pub fn open_table(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?
        .starts_with(&GZIP_MAGIC);
    if is_gzip {
        debug!("{} is gzip-compressed", path.display());
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

fn parse_genotype(cell: &str, path: &Path, line: usize, column: usize) -> Result<f64> {
    match cell.trim().parse::<i64>() {
        Ok(v) if v >= 0 || v == -9 => Ok(v as f64),
        _ => Err(anyhow!(
            "Invalid genotype '{}' in {} at line {}, column {}: expected a non-negative integer or -9.",
            cell,
            path.display(),
            line,
            column
        )),
    }
}

/// Individuals and loci of a genotype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub individuals: usize,
    pub loci: usize,
}

/// Reads the whole table once, checking that every row has the same number
/// of columns and that every genotype cell is valid.
pub fn scan_genotype_table(path: &Path) -> Result<TableShape> {
    let mut rows = GenotypeRows::open(path, None)?;
    let mut individuals = 0;
    while rows.next_row()?.is_some() {
        individuals += 1;
    }
    let loci = rows.loci.unwrap_or(0);
    if individuals == 0 || loci == 0 {
        return Err(anyhow!(
            "{} contains no genotype data ({} rows, {} loci).",
            path.display(),
            individuals,
            loci
        ));
    }
    info!(
        "{} individuals and {} loci are detected in {}.",
        individuals,
        loci,
        path.display()
    );
    Ok(TableShape { individuals, loci })
}

/// One parsed genotype row restricted to the selected columns.
#[derive(Debug, Clone)]
pub struct GenotypeRow {
    pub id: SampleId,
    pub genotypes: Vec<f64>,
}

/// Streaming reader over the rows of a genotype table.
pub struct GenotypeRows {
    path: PathBuf,
    lines: Lines<Box<dyn BufRead + Send>>,
    line_number: usize,
    loci: Option<usize>,
    columns: Option<Vec<usize>>,
}

impl GenotypeRows {
    /// `columns` selects locus columns (0-based, after the identifiers); all
    /// loci are kept when `None`.
    pub fn open(path: &Path, columns: Option<Vec<usize>>) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            lines: open_table(path)?.lines(),
            line_number: 0,
            loci: None,
            columns,
        })
    }

    /// Next non-empty row, or `None` at end of file.
    pub fn next_row(&mut self) -> Result<Option<GenotypeRow>> {
        loop {
            let line = match self.lines.next() {
                None => return Ok(None),
                Some(line) => line.map_err(|e| {
                    anyhow!(
                        "Error reading line {} of {}: {}",
                        self.line_number + 1,
                        self.path.display(),
                        e
                    )
                })?,
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return self.parse_line(&line).map(Some);
        }
    }

    /// Skips one row without parsing its genotypes.
    pub fn skip_row(&mut self) -> Result<bool> {
        loop {
            match self.lines.next() {
                None => return Ok(false),
                Some(line) => {
                    let line = line.map_err(|e| anyhow!("Error reading {}: {}", self.path.display(), e))?;
                    self.line_number += 1;
                    if !line.trim().is_empty() {
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<GenotypeRow> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() <= ID_COLUMNS {
            return Err(anyhow!(
                "Line {} of {} has {} columns; expected two identifiers followed by genotypes.",
                self.line_number,
                self.path.display(),
                fields.len()
            ));
        }
        let loci = fields.len() - ID_COLUMNS;
        match self.loci {
            None => self.loci = Some(loci),
            Some(expected) if expected != loci => {
                return Err(anyhow!(
                    "Invalid number of columns in {} at line {}: found {} loci, expected {}.",
                    self.path.display(),
                    self.line_number,
                    loci,
                    expected
                ));
            }
            Some(_) => {}
        }

        let id = SampleId {
            pop_id: fields[0].to_string(),
            indiv_id: fields[1].to_string(),
        };
        let genotypes = match &self.columns {
            Some(columns) => columns
                .iter()
                .map(|&c| {
                    let cell = fields.get(ID_COLUMNS + c).ok_or_else(|| {
                        anyhow!(
                            "Locus column {} is out of range in {} at line {}.",
                            c + 1,
                            self.path.display(),
                            self.line_number
                        )
                    })?;
                    parse_genotype(cell, &self.path, self.line_number, ID_COLUMNS + c + 1)
                })
                .collect::<Result<Vec<f64>>>()?,
            None => fields[ID_COLUMNS..]
                .iter()
                .enumerate()
                .map(|(c, cell)| parse_genotype(cell, &self.path, self.line_number, ID_COLUMNS + c + 1))
                .collect::<Result<Vec<f64>>>()?,
        };
        Ok(GenotypeRow { id, genotypes })
    }
}

/// Reads the reference rows listed in `rows` (sorted, 0-based) at the given
/// locus columns.
pub fn read_reference_rows(path: &Path, rows: &[usize], columns: &[usize]) -> Result<(Vec<SampleId>, Array2<f64>)> {
    let mut reader = GenotypeRows::open(path, Some(columns.to_vec()))?;
    let mut ids = Vec::with_capacity(rows.len());
    let mut matrix = Array2::<f64>::zeros((rows.len(), columns.len()));
    let mut current = 0;
    for (slot, &wanted) in rows.iter().enumerate() {
        while current < wanted {
            if !reader.skip_row()? {
                return Err(anyhow!("{} ended before row {}.", path.display(), wanted + 1));
            }
            current += 1;
        }
        let row = reader
            .next_row()?
            .ok_or_else(|| anyhow!("{} ended before row {}.", path.display(), wanted + 1))?;
        current += 1;
        for (j, g) in row.genotypes.into_iter().enumerate() {
            matrix[[slot, j]] = g;
        }
        ids.push(row.id);
    }
    Ok((ids, matrix))
}

/// Reference coordinates for the rows listed in `rows`, checked against
/// `ids` (the genotype table identifiers of the same rows).
///
/// The table has one header line, then `popID indivID PC1..PCn`.
pub fn read_coordinate_table(path: &Path, rows: &[usize], ids: &[SampleId]) -> Result<Array2<f64>> {
    if rows.len() != ids.len() {
        return Err(anyhow!(
            "Internal error: {} coordinate rows requested for {} identifiers.",
            rows.len(),
            ids.len()
        ));
    }
    let mut lines = open_table(path)?.lines();
    lines
        .next()
        .ok_or_else(|| anyhow!("{} is empty; expected a header line.", path.display()))?
        .map_err(|e| anyhow!("Error reading {}: {}", path.display(), e))?;

    let mut data: Vec<Vec<f64>> = Vec::with_capacity(rows.len());
    let mut num_pcs: Option<usize> = None;
    let mut wanted = rows.iter().enumerate().peekable();
    let mut individual = 0;
    for (line_idx, line) in lines.enumerate() {
        let line = line.map_err(|e| anyhow!("Error reading {}: {}", path.display(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = line_idx + 2;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= ID_COLUMNS {
            return Err(anyhow!(
                "Line {} of {} has no coordinate columns.",
                line_number,
                path.display()
            ));
        }
        let pcs = fields.len() - ID_COLUMNS;
        match num_pcs {
            None => num_pcs = Some(pcs),
            Some(expected) if expected != pcs => {
                return Err(anyhow!(
                    "Invalid number of columns in {} at line {}: found {} PCs, expected {}.",
                    path.display(),
                    line_number,
                    pcs,
                    expected
                ));
            }
            Some(_) => {}
        }

        if let Some(&(slot, &row)) = wanted.peek() {
            if row == individual {
                let expected = &ids[slot];
                if fields[0] != expected.pop_id || fields[1] != expected.indiv_id {
                    return Err(anyhow!(
                        "ID of individual {} in {} ({} {}) differs from that in the GENO_FILE ({} {}).",
                        individual + 1,
                        path.display(),
                        fields[0],
                        fields[1],
                        expected.pop_id,
                        expected.indiv_id
                    ));
                }
                let coords = fields[ID_COLUMNS..]
                    .iter()
                    .map(|v| {
                        v.parse::<f64>().map_err(|e| {
                            anyhow!(
                                "Invalid coordinate '{}' in {} at line {}: {}",
                                v,
                                path.display(),
                                line_number,
                                e
                            )
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                data.push(coords);
                wanted.next();
            }
        }
        individual += 1;
    }

    if data.len() != rows.len() {
        return Err(anyhow!(
            "{} has {} individuals; the GENO_FILE rows selected need at least {}.",
            path.display(),
            individual,
            rows.last().map_or(0, |r| r + 1)
        ));
    }
    let pcs = num_pcs.unwrap_or(0);
    let flat: Vec<f64> = data.into_iter().flatten().collect();
    Array2::from_shape_vec((rows.len(), pcs), flat)
        .map_err(|e| anyhow!("Failed to assemble coordinates from {}: {}", path.display(), e))
}

/// Number of individuals and PCs in a coordinate table (header excluded).
pub fn coordinate_table_shape(path: &Path) -> Result<(usize, usize)> {
    let mut lines = open_table(path)?.lines();
    if lines.next().is_none() {
        return Err(anyhow!("{} is empty; expected a header line.", path.display()));
    }
    let mut individuals = 0;
    let mut pcs = 0;
    for line in lines {
        let line = line.map_err(|e| anyhow!("Error reading {}: {}", path.display(), e))?;
        let width = line.split_whitespace().count();
        if width == 0 {
            continue;
        }
        if individuals == 0 {
            pcs = width.saturating_sub(ID_COLUMNS);
        }
        individuals += 1;
    }
    info!(
        "{} individuals and {} PCs are detected in {}.",
        individuals,
        pcs,
        path.display()
    );
    Ok((individuals, pcs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    const GENO: &str = "P1\tI1\t0\t1\t2\n\
                        P1\tI2\t-9\t2\t0\n\
                        P2\tI3\t1\t1\t1\n\
                        P2\tI4\t2\t0\t-9\n";

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn scans_plain_and_gzip_tables() {
        let dir = tempdir().unwrap();
        let plain = write_file(dir.path(), "ref.geno", GENO);
        let gz_path = dir.path().join("ref.geno.gz");
        let mut encoder = GzEncoder::new(File::create(&gz_path).unwrap(), Compression::default());
        encoder.write_all(GENO.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let expected = TableShape {
            individuals: 4,
            loci: 3,
        };
        assert_eq!(scan_genotype_table(&plain).unwrap(), expected);
        assert_eq!(scan_genotype_table(&gz_path).unwrap(), expected);
    }

    #[test]
    fn rejects_ragged_rows_and_bad_cells() {
        let dir = tempdir().unwrap();
        let ragged = write_file(dir.path(), "a.geno", "P\tI1\t0\t1\nP\tI2\t0\n");
        assert!(scan_genotype_table(&ragged).is_err());
        let bad = write_file(dir.path(), "b.geno", "P\tI1\t0\t-1\n");
        let err = scan_genotype_table(&bad).unwrap_err().to_string();
        assert!(err.contains("line 1"), "{}", err);
        let text = write_file(dir.path(), "c.geno", "P\tI1\t0\tA\n");
        assert!(scan_genotype_table(&text).is_err());
    }

    #[test]
    fn reads_selected_reference_rows_and_columns() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "ref.geno", GENO);
        let (ids, matrix) = read_reference_rows(&path, &[1, 3], &[2, 0]).unwrap();
        assert_eq!(ids[0].indiv_id, "I2");
        assert_eq!(ids[1].pop_id, "P2");
        assert_eq!(matrix, ndarray::array![[0.0, -9.0], [-9.0, 2.0]]);
    }

    #[test]
    fn streams_study_rows() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "study.geno", GENO);
        let mut rows = GenotypeRows::open(&path, Some(vec![1])).unwrap();
        assert!(rows.skip_row().unwrap());
        let row = rows.next_row().unwrap().unwrap();
        assert_eq!(row.id.indiv_id, "I2");
        assert_eq!(row.genotypes, vec![2.0]);
        assert!(rows.next_row().unwrap().is_some());
        assert!(rows.next_row().unwrap().is_some());
        assert!(rows.next_row().unwrap().is_none());
    }

    #[test]
    fn coordinate_rows_must_match_genotype_ids() {
        let dir = tempdir().unwrap();
        let coord = write_file(
            dir.path(),
            "ref.coord",
            "popID\tindivID\tPC1\tPC2\nP1\tI1\t0.5\t-1\nP1\tI2\t1.5\t2\nP2\tI3\t3\t4\n",
        );
        let ids = vec![
            SampleId {
                pop_id: "P1".into(),
                indiv_id: "I1".into(),
            },
            SampleId {
                pop_id: "P2".into(),
                indiv_id: "I3".into(),
            },
        ];
        let coords = read_coordinate_table(&coord, &[0, 2], &ids).unwrap();
        assert_eq!(coords, ndarray::array![[0.5, -1.0], [3.0, 4.0]]);
        assert_eq!(coordinate_table_shape(&coord).unwrap(), (3, 2));

        let swapped = vec![ids[1].clone(), ids[0].clone()];
        let err = read_coordinate_table(&coord, &[0, 2], &swapped).unwrap_err().to_string();
        assert!(err.contains("differs"), "{}", err);
    }
}
