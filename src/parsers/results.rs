// ==============================================================================
// results.rs - Raw Coloc Results Reader
// ==============================================================================
// Description: Reads the raw coloc results relation from parquet in row-group
//              sized work units
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Columns:
//   left_/right_ {type, study, phenotype, bio_feature, chrom, pos, ref, alt}
//   PP.H0.abf .. PP.H4.abf (or coloc_h0 .. coloc_h4)
//   nsnps (or coloc_n_vars)
// Types are coerced: identifiers to text, positions and counts to Int64,
// posteriors to Float64. Values that fail coercion become null.
// ==============================================================================

use arrow::array::{ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{RawResult, RawTrait};

/// Identity column suffixes shared by the left_ and right_ sides
const TRAIT_FIELDS: [&str; 8] = [
    "type",
    "study",
    "phenotype",
    "bio_feature",
    "chrom",
    "pos",
    "ref",
    "alt",
];

/// Raw coloc column, then its canonical name
const POSTERIOR_COLUMNS: [[&str; 2]; 5] = [
    ["PP.H0.abf", "coloc_h0"],
    ["PP.H1.abf", "coloc_h1"],
    ["PP.H2.abf", "coloc_h2"],
    ["PP.H3.abf", "coloc_h3"],
    ["PP.H4.abf", "coloc_h4"],
];

const NSNPS_COLUMN: [&str; 2] = ["nsnps", "coloc_n_vars"];

/// Errors that can occur while reading results
#[derive(Error, Debug)]
pub enum ResultsReadError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] ArrowError),

    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Column '{column}' could not be read as {expected}")]
    UnexpectedType {
        column: String,
        expected: &'static str,
    },
}

/// One row group of one parquet file; the unit of parallel work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanUnit {
    pub path: PathBuf,
    pub row_group: usize,
    pub rows: i64,
}

/// Reader over a set of parquet files holding the raw results
pub struct ResultsReader {
    files: Vec<PathBuf>,
    batch_size: usize,
}

impl ResultsReader {
    /// Open a results relation and check every file carries the required
    /// columns
    ///
    /// # Arguments
    /// * `files` - Parquet files making up the relation
    /// * `batch_size` - Rows per decoded record batch
    pub fn open(files: Vec<PathBuf>, batch_size: usize) -> Result<Self, ResultsReadError> {
        for path in &files {
            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
            check_schema(path, builder.schema())?;
        }

        Ok(Self { files, batch_size })
    }

    /// Split the relation into row-group work units
    pub fn scan_units(&self) -> Result<Vec<ScanUnit>, ResultsReadError> {
        let mut units = Vec::new();

        for path in &self.files {
            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
            let metadata = builder.metadata();

            for (row_group, group) in metadata.row_groups().iter().enumerate() {
                units.push(ScanUnit {
                    path: path.clone(),
                    row_group,
                    rows: group.num_rows(),
                });
            }
        }

        info!(
            "Planned {} work units over {} file(s), {} rows",
            units.len(),
            self.files.len(),
            units.iter().map(|u| u.rows).sum::<i64>()
        );

        Ok(units)
    }

    /// Decode one work unit, a record batch at a time
    pub fn read_unit(
        &self,
        unit: &ScanUnit,
    ) -> Result<impl Iterator<Item = Result<Vec<RawResult>, ResultsReadError>>, ResultsReadError>
    {
        debug!("Reading row group {} of {:?}", unit.row_group, unit.path);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&unit.path)?)?
            .with_batch_size(self.batch_size)
            .with_row_groups(vec![unit.row_group])
            .build()?;

        Ok(reader.map(|batch| decode_batch(&batch?)))
    }
}

fn check_schema(path: &Path, schema: &Schema) -> Result<(), ResultsReadError> {
    let has = |names: &[&str]| names.iter().any(|n| schema.column_with_name(n).is_some());
    let missing = |column: &str| ResultsReadError::MissingColumn {
        path: path.to_path_buf(),
        column: column.to_string(),
    };

    for side in ["left", "right"] {
        for field in TRAIT_FIELDS {
            let column = format!("{}_{}", side, field);
            if !has(&[column.as_str()][..]) {
                return Err(missing(&column));
            }
        }
    }
    for names in POSTERIOR_COLUMNS.iter().chain(std::iter::once(&NSNPS_COLUMN)) {
        if !has(&names[..]) {
            return Err(missing(names[0]));
        }
    }

    Ok(())
}

/// Decode a record batch into raw result rows
pub fn decode_batch(batch: &RecordBatch) -> Result<Vec<RawResult>, ResultsReadError> {
    let left = decode_side(batch, "left")?;
    let right = decode_side(batch, "right")?;

    let mut posteriors = Vec::with_capacity(POSTERIOR_COLUMNS.len());
    for names in &POSTERIOR_COLUMNS {
        posteriors.push(float_values(batch, names)?);
    }
    let nsnps = int_values(batch, &NSNPS_COLUMN)?;

    let rows = left
        .into_iter()
        .zip(right)
        .enumerate()
        .map(|(i, (left, right))| RawResult {
            left,
            right,
            posteriors: [
                posteriors[0][i],
                posteriors[1][i],
                posteriors[2][i],
                posteriors[3][i],
                posteriors[4][i],
            ],
            nsnps: nsnps[i],
        })
        .collect();

    Ok(rows)
}

fn decode_side(batch: &RecordBatch, side: &str) -> Result<Vec<RawTrait>, ResultsReadError> {
    let name = |field: &str| format!("{}_{}", side, field);

    let mut dataset_type = text_values(batch, &name("type"))?.into_iter();
    let mut study = text_values(batch, &name("study"))?.into_iter();
    let mut phenotype = text_values(batch, &name("phenotype"))?.into_iter();
    let mut bio_feature = text_values(batch, &name("bio_feature"))?.into_iter();
    let mut chrom = text_values(batch, &name("chrom"))?.into_iter();
    let mut pos = int_values(batch, &[name("pos").as_str()])?.into_iter();
    let mut ref_allele = text_values(batch, &name("ref"))?.into_iter();
    let mut alt_allele = text_values(batch, &name("alt"))?.into_iter();

    let traits = (0..batch.num_rows())
        .map(|_| RawTrait {
            dataset_type: dataset_type.next().flatten(),
            study: study.next().flatten(),
            phenotype: phenotype.next().flatten(),
            bio_feature: bio_feature.next().flatten(),
            chrom: chrom.next().flatten(),
            pos: pos.next().flatten(),
            ref_allele: ref_allele.next().flatten(),
            alt_allele: alt_allele.next().flatten(),
        })
        .collect();

    Ok(traits)
}

fn find_column<'a>(batch: &'a RecordBatch, names: &[&str]) -> Result<&'a ArrayRef, ResultsReadError> {
    names
        .iter()
        .find_map(|name| batch.column_by_name(name))
        .ok_or_else(|| ResultsReadError::MissingColumn {
            path: PathBuf::new(),
            column: names.first().copied().unwrap_or_default().to_string(),
        })
}

fn text_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>, ResultsReadError> {
    let array = cast(find_column(batch, &[name])?.as_ref(), &DataType::Utf8)?;
    let strings = array
        .as_string_opt::<i32>()
        .ok_or_else(|| ResultsReadError::UnexpectedType {
            column: name.to_string(),
            expected: "text",
        })?;

    Ok(strings.iter().map(|v| v.map(str::to_string)).collect())
}

fn int_values(batch: &RecordBatch, names: &[&str]) -> Result<Vec<Option<i64>>, ResultsReadError> {
    let array = cast(find_column(batch, names)?.as_ref(), &DataType::Int64)?;
    let ints = array
        .as_primitive_opt::<Int64Type>()
        .ok_or_else(|| ResultsReadError::UnexpectedType {
            column: names[0].to_string(),
            expected: "Int64",
        })?;

    Ok(ints.iter().collect())
}

fn float_values(batch: &RecordBatch, names: &[&str]) -> Result<Vec<Option<f64>>, ResultsReadError> {
    let array = cast(find_column(batch, names)?.as_ref(), &DataType::Float64)?;
    let floats = array
        .as_primitive_opt::<Float64Type>()
        .ok_or_else(|| ResultsReadError::UnexpectedType {
            column: names[0].to_string(),
            expected: "Float64",
        })?;

    Ok(floats.iter().collect())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;
    use std::path::Path;
    use std::sync::Arc;

    /// (left type, left study, left pos, right type, right study, right pos, h3, h4, nsnps)
    pub type Row<'a> = (&'a str, &'a str, i64, &'a str, &'a str, i64, f64, f64, Option<f64>);

    fn strings(values: impl Iterator<Item = String>) -> ArrayRef {
        Arc::new(StringArray::from(values.collect::<Vec<_>>()))
    }

    fn ints(values: impl Iterator<Item = i64>) -> ArrayRef {
        Arc::new(Int64Array::from(values.collect::<Vec<_>>()))
    }

    fn floats(values: impl Iterator<Item = Option<f64>>) -> ArrayRef {
        Arc::new(Float64Array::from(values.collect::<Vec<_>>()))
    }

    /// Raw coloc output as written by the coloc wrapper (nsnps as a double)
    pub fn raw_batch(rows: &[Row]) -> RecordBatch {
        let constant = |value: &str| strings(rows.iter().map(|_| value.to_string()));
        let columns: Vec<(&str, ArrayRef)> = vec![
            ("left_type", strings(rows.iter().map(|r| r.0.to_string()))),
            ("left_study", strings(rows.iter().map(|r| r.1.to_string()))),
            ("left_phenotype", strings(rows.iter().map(|r| format!("{}_pheno", r.1)))),
            ("left_bio_feature", strings(rows.iter().map(|r| format!("{}_tissue", r.1)))),
            ("left_chrom", constant("1")),
            ("left_pos", ints(rows.iter().map(|r| r.2))),
            ("left_ref", constant("A")),
            ("left_alt", constant("G")),
            ("right_type", strings(rows.iter().map(|r| r.3.to_string()))),
            ("right_study", strings(rows.iter().map(|r| r.4.to_string()))),
            ("right_phenotype", strings(rows.iter().map(|r| format!("{}_pheno", r.4)))),
            ("right_bio_feature", strings(rows.iter().map(|r| format!("{}_tissue", r.4)))),
            ("right_chrom", constant("1")),
            ("right_pos", ints(rows.iter().map(|r| r.5))),
            ("right_ref", constant("C")),
            ("right_alt", constant("T")),
            ("PP.H0.abf", floats(rows.iter().map(|_| Some(0.0)))),
            ("PP.H1.abf", floats(rows.iter().map(|_| Some(0.05)))),
            ("PP.H2.abf", floats(rows.iter().map(|_| Some(0.05)))),
            ("PP.H3.abf", floats(rows.iter().map(|r| Some(r.6)))),
            ("PP.H4.abf", floats(rows.iter().map(|r| Some(r.7)))),
            ("nsnps", floats(rows.iter().map(|r| r.8))),
        ];

        let schema = Schema::new(
            columns
                .iter()
                .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
                .collect::<Vec<_>>(),
        );
        RecordBatch::try_new(
            Arc::new(schema),
            columns.into_iter().map(|(_, array)| array).collect(),
        )
        .unwrap()
    }

    /// Write batches to a parquet file, one row group per batch
    pub fn write_parquet(path: &Path, batches: &[RecordBatch]) {
        let file = std::fs::File::create(path).unwrap();
        let props = WriterProperties::builder()
            .set_max_row_group_size(1024)
            .build();
        let mut writer = ArrowWriter::try_new(file, batches[0].schema(), Some(props)).unwrap();
        for batch in batches {
            writer.write(batch).unwrap();
            writer.flush().unwrap();
        }
        writer.close().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::Field;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_decode_renamed_columns() {
        let batch = raw_batch(&[
            ("gwas", "GCST1", 100, "eqtl", "GTEX", 150, 0.1, 0.8, Some(150.0)),
            ("gwas", "GCST2", 200, "eqtl", "GTEX", 250, 0.0, 0.2, None),
        ]);

        let rows = decode_batch(&batch).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].left.study.as_deref(), Some("GCST1"));
        assert_eq!(rows[0].right.pos, Some(150));
        assert_eq!(rows[0].posteriors[4], Some(0.8));
        assert_eq!(rows[0].nsnps, Some(150));
        assert_eq!(rows[1].nsnps, None);
    }

    #[test]
    fn test_integer_chromosomes_are_coerced_to_text() {
        let batch = raw_batch(&[("gwas", "GCST1", 100, "eqtl", "GTEX", 150, 0.1, 0.8, Some(150.0))]);
        let schema = batch.schema();
        let idx = schema.index_of("left_chrom").unwrap();

        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields[idx] = Field::new("left_chrom", DataType::Int32, true);
        let mut columns = batch.columns().to_vec();
        columns[idx] = Arc::new(Int32Array::from(vec![22]));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();

        let rows = decode_batch(&batch).unwrap();
        assert_eq!(rows[0].left.chrom.as_deref(), Some("22"));
    }

    #[test]
    fn test_unparseable_count_becomes_null() {
        let batch = raw_batch(&[("gwas", "GCST1", 100, "eqtl", "GTEX", 150, 0.1, 0.8, Some(150.0))]);
        let schema = batch.schema();
        let idx = schema.index_of("nsnps").unwrap();

        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields[idx] = Field::new("nsnps", DataType::Utf8, true);
        let mut columns = batch.columns().to_vec();
        columns[idx] = Arc::new(StringArray::from(vec!["many"]));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();

        let rows = decode_batch(&batch).unwrap();
        assert_eq!(rows[0].nsnps, None);
    }

    #[test]
    fn test_scan_units_per_row_group() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coloc_raw.parquet");
        let first = raw_batch(&[("gwas", "GCST1", 100, "eqtl", "GTEX", 150, 0.1, 0.8, Some(150.0))]);
        let second = raw_batch(&[
            ("gwas", "GCST2", 200, "eqtl", "GTEX", 250, 0.1, 0.8, Some(150.0)),
            ("gwas", "GCST3", 300, "eqtl", "GTEX", 350, 0.1, 0.8, Some(150.0)),
        ]);
        write_parquet(&path, &[first, second]);

        let reader = ResultsReader::open(vec![path.clone()], 1024).unwrap();
        let units = reader.scan_units().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].rows, 2);

        let rows: Vec<RawResult> = reader
            .read_unit(&units[1])
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].left.study.as_deref(), Some("GCST3"));
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coloc_raw.parquet");
        let batch = raw_batch(&[("gwas", "GCST1", 100, "eqtl", "GTEX", 150, 0.1, 0.8, Some(150.0))]);
        let batch = batch.project(&[0, 1, 2]).unwrap();
        write_parquet(&path, &[batch]);

        match ResultsReader::open(vec![path], 1024) {
            Err(ResultsReadError::MissingColumn { column, .. }) => assert_eq!(column, "left_bio_feature"),
            Err(other) => panic!("Expected MissingColumn, got {:?}", other),
            Ok(_) => panic!("Expected MissingColumn"),
        }
    }
}
