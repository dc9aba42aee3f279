// ==============================================================================
// output.rs - Partitioned Results Output
// ==============================================================================
// Description: Write the consolidated relation as ordered, range-partitioned
//              part files (gzip NDJSON or parquet)
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::models::ResultRecord;

/// Marker written once every part file is complete
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Supported part file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Gzip-compressed newline-delimited JSON
    Json,
    /// Apache Parquet, snappy-compressed
    Parquet,
}

impl OutputFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json.gz",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// One output row, fields in output column order
#[derive(Debug, Serialize)]
pub struct ColocRow<'a> {
    pub left_type: &'a str,
    pub left_study: &'a str,
    pub left_phenotype: Option<&'a str>,
    pub left_bio_feature: Option<&'a str>,
    pub left_chrom: &'a str,
    pub left_pos: i64,
    pub left_ref: &'a str,
    pub left_alt: &'a str,
    pub right_type: &'a str,
    pub right_study: &'a str,
    pub right_phenotype: Option<&'a str>,
    pub right_bio_feature: Option<&'a str>,
    pub right_chrom: &'a str,
    pub right_pos: i64,
    pub right_ref: &'a str,
    pub right_alt: &'a str,
    pub coloc_n_vars: Option<i64>,
    pub coloc_h0: Option<f64>,
    pub coloc_h1: Option<f64>,
    pub coloc_h2: Option<f64>,
    pub coloc_h3: Option<f64>,
    pub coloc_h4: Option<f64>,
    pub coloc_h4_h3: Option<f64>,
    pub coloc_log2_h4_h3: Option<f64>,
    pub is_flipped: bool,
    pub left_gene_id: Option<&'a str>,
    pub right_gene_id: Option<&'a str>,
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl<'a> From<&'a ResultRecord> for ColocRow<'a> {
    fn from(r: &'a ResultRecord) -> Self {
        ColocRow {
            left_type: &r.left.dataset_type,
            left_study: &r.left.study,
            left_phenotype: r.left.phenotype.as_deref(),
            left_bio_feature: r.left.bio_feature.as_deref(),
            left_chrom: &r.left.chrom,
            left_pos: r.left.pos,
            left_ref: &r.left.ref_allele,
            left_alt: &r.left.alt_allele,
            right_type: &r.right.dataset_type,
            right_study: &r.right.study,
            right_phenotype: r.right.phenotype.as_deref(),
            right_bio_feature: r.right.bio_feature.as_deref(),
            right_chrom: &r.right.chrom,
            right_pos: r.right.pos,
            right_ref: &r.right.ref_allele,
            right_alt: &r.right.alt_allele,
            coloc_n_vars: r.coloc_n_vars,
            coloc_h0: finite(r.coloc_h0),
            coloc_h1: finite(r.coloc_h1),
            coloc_h2: finite(r.coloc_h2),
            coloc_h3: finite(r.coloc_h3),
            coloc_h4: finite(r.coloc_h4),
            coloc_h4_h3: finite(r.coloc_h4_h3),
            coloc_log2_h4_h3: finite(r.coloc_log2_h4_h3),
            is_flipped: r.is_flipped,
            left_gene_id: r.left.gene_id.as_deref(),
            right_gene_id: r.right.gene_id.as_deref(),
        }
    }
}

/// Split sorted records into at most `partitions` contiguous ranges.
///
/// Rows sharing a left (chrom, pos) never straddle two ranges and no range
/// is empty.
pub fn partition_bounds(records: &[ResultRecord], partitions: usize) -> Vec<Range<usize>> {
    let n = records.len();
    let target = n.div_ceil(partitions.max(1)).max(1);
    let same_locus = |a: &ResultRecord, b: &ResultRecord| {
        a.left.pos == b.left.pos && a.left.chrom == b.left.chrom
    };

    let mut bounds = Vec::new();
    let mut start = 0;
    while start < n {
        let mut end = (start + target).min(n);
        while end < n && same_locus(&records[end - 1], &records[end]) {
            end += 1;
        }
        bounds.push(start..end);
        start = end;
    }

    bounds
}

/// Writes the consolidated relation to a directory of part files
pub struct OutputWriter {
    output_dir: PathBuf,
    format: OutputFormat,
    partitions: usize,
}

impl OutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>, format: OutputFormat, partitions: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
            partitions,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Replace any existing output and write the ordered records as parts
    ///
    /// # Returns
    /// * Paths of the part files, in partition order
    pub fn write(&self, records: &[ResultRecord]) -> Result<Vec<PathBuf>> {
        self.prepare()?;

        let bounds = partition_bounds(records, self.partitions);
        let mut parts = Vec::with_capacity(bounds.len());

        for (index, range) in bounds.into_iter().enumerate() {
            let path = self
                .output_dir
                .join(format!("part-{:05}.{}", index, self.format.extension()));
            let slice = &records[range];

            match self.format {
                OutputFormat::Json => write_json_part(&path, slice)?,
                OutputFormat::Parquet => write_parquet_part(&path, slice)?,
            }
            debug!("Wrote {} rows to {:?}", slice.len(), path);
            parts.push(path);
        }

        info!(
            "Wrote {} rows in {} part file(s) to {:?}",
            records.len(),
            parts.len(),
            self.output_dir
        );

        Ok(parts)
    }

    /// Write the success marker; call after everything else in the directory
    pub fn commit(&self) -> Result<PathBuf> {
        let marker = self.output_dir.join(SUCCESS_MARKER);
        File::create(&marker)
            .with_context(|| format!("Failed to write {}", marker.display()))?;
        Ok(marker)
    }

    fn prepare(&self) -> Result<()> {
        let dir = &self.output_dir;
        if dir.is_dir() {
            info!("Removing existing output {:?}", dir);
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to remove existing output {}", dir.display()))?;
        } else if dir.exists() {
            std::fs::remove_file(dir)
                .with_context(|| format!("Failed to remove existing output {}", dir.display()))?;
        }

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))
    }
}

fn write_json_part(path: &Path, records: &[ResultRecord]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(flate2::write::GzEncoder::new(
        file,
        flate2::Compression::default(),
    ));

    for record in records {
        serde_json::to_writer(&mut writer, &ColocRow::from(record))
            .context("Failed to serialize result row")?;
        writer.write_all(b"\n")?;
    }

    let encoder = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Failed to flush part file")?;
    encoder.finish().context("Failed to finish gzip stream")?;
    Ok(())
}

fn part_schema() -> Arc<Schema> {
    let text = |name: &str, nullable: bool| Field::new(name, DataType::Utf8, nullable);
    let mut fields = Vec::new();

    for side in ["left", "right"] {
        fields.push(text(&format!("{}_type", side), false));
        fields.push(text(&format!("{}_study", side), false));
        fields.push(text(&format!("{}_phenotype", side), true));
        fields.push(text(&format!("{}_bio_feature", side), true));
        fields.push(text(&format!("{}_chrom", side), false));
        fields.push(Field::new(format!("{}_pos", side), DataType::Int64, false));
        fields.push(text(&format!("{}_ref", side), false));
        fields.push(text(&format!("{}_alt", side), false));
    }
    fields.push(Field::new("coloc_n_vars", DataType::Int64, true));
    for name in [
        "coloc_h0",
        "coloc_h1",
        "coloc_h2",
        "coloc_h3",
        "coloc_h4",
        "coloc_h4_h3",
        "coloc_log2_h4_h3",
    ] {
        fields.push(Field::new(name, DataType::Float64, true));
    }
    fields.push(Field::new("is_flipped", DataType::Boolean, false));
    fields.push(text("left_gene_id", true));
    fields.push(text("right_gene_id", true));

    Arc::new(Schema::new(fields))
}

fn text_array<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn opt_text_array<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn int_array(values: impl Iterator<Item = Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values.collect::<Vec<_>>()))
}

fn float_array(values: impl Iterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values.collect::<Vec<_>>()))
}

fn write_parquet_part(path: &Path, records: &[ResultRecord]) -> Result<()> {
    let rows: Vec<ColocRow> = records.iter().map(ColocRow::from).collect();

    let columns: Vec<ArrayRef> = vec![
        text_array(rows.iter().map(|r| r.left_type)),
        text_array(rows.iter().map(|r| r.left_study)),
        opt_text_array(rows.iter().map(|r| r.left_phenotype)),
        opt_text_array(rows.iter().map(|r| r.left_bio_feature)),
        text_array(rows.iter().map(|r| r.left_chrom)),
        int_array(rows.iter().map(|r| Some(r.left_pos))),
        text_array(rows.iter().map(|r| r.left_ref)),
        text_array(rows.iter().map(|r| r.left_alt)),
        text_array(rows.iter().map(|r| r.right_type)),
        text_array(rows.iter().map(|r| r.right_study)),
        opt_text_array(rows.iter().map(|r| r.right_phenotype)),
        opt_text_array(rows.iter().map(|r| r.right_bio_feature)),
        text_array(rows.iter().map(|r| r.right_chrom)),
        int_array(rows.iter().map(|r| Some(r.right_pos))),
        text_array(rows.iter().map(|r| r.right_ref)),
        text_array(rows.iter().map(|r| r.right_alt)),
        int_array(rows.iter().map(|r| r.coloc_n_vars)),
        float_array(rows.iter().map(|r| r.coloc_h0)),
        float_array(rows.iter().map(|r| r.coloc_h1)),
        float_array(rows.iter().map(|r| r.coloc_h2)),
        float_array(rows.iter().map(|r| r.coloc_h3)),
        float_array(rows.iter().map(|r| r.coloc_h4)),
        float_array(rows.iter().map(|r| r.coloc_h4_h3)),
        float_array(rows.iter().map(|r| r.coloc_log2_h4_h3)),
        Arc::new(BooleanArray::from(
            rows.iter().map(|r| r.is_flipped).collect::<Vec<_>>(),
        )),
        opt_text_array(rows.iter().map(|r| r.left_gene_id)),
        opt_text_array(rows.iter().map(|r| r.right_gene_id)),
    ];

    let schema = part_schema();
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .context("Failed to create Arrow RecordBatch")?;

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .context("Failed to create Parquet writer")?;
    writer
        .write(&batch)
        .context("Failed to write Parquet data")?;
    writer.close().context("Failed to close Parquet writer")?;

    Ok(())
}
