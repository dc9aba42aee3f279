// ==============================================================================
// manifest.rs - Coloc Job Manifest Parser
// ==============================================================================
// Description: Streams job descriptors from a newline-delimited JSON manifest
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Format: one JSON object per line (gzip or plain)
// Example:
//   {"left_sumstats": "gwas/GCST1.parquet", "left_ld": "ld/EUR", "left_type": "gwas",
//    "left_study_id": "GCST1", "left_phenotype_id": null, "left_bio_feature": null,
//    "left_lead_chrom": "1", "left_lead_pos": 1000, ..., "method": "conditional",
//    "out": "output/GCST1_eQTLGen.json.gz", "log": "logs/1.log", "tmpdir": "tmp/1"}
// ==============================================================================

use serde::{Deserialize, Deserializer};
use std::io::{BufRead, Lines};
use std::path::Path;
use thiserror::Error;

use crate::models::{JobDescriptor, JobSide};
use crate::parsers::open_text;

/// Errors that can occur while reading the manifest
#[derive(Error, Debug)]
pub enum ManifestParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid manifest entry at line {line}: {source}")]
    InvalidEntry {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A manifest scalar; chromosomes and positions are often numbers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

/// Textual form of an optional scalar; null ids are carried as "None",
/// which is what the coloc wrapper expects
fn text(value: Option<Scalar>) -> String {
    match value {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Number(n)) => n.to_string(),
        Some(Scalar::Bool(b)) => if b { "True" } else { "False" }.to_string(),
        None => "None".to_string(),
    }
}

/// Present but possibly null; unlike a bare `Option`, a missing key is an error
fn nullable<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Scalar>, D::Error> {
    Option::deserialize(deserializer)
}

/// Wire layout of one manifest line
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    left_sumstats: String,
    left_ld: String,
    #[serde(deserialize_with = "nullable")]
    left_type: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_study_id: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_phenotype_id: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_bio_feature: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_lead_chrom: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_lead_pos: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_lead_ref: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    left_lead_alt: Option<Scalar>,
    right_sumstats: String,
    right_ld: String,
    #[serde(deserialize_with = "nullable")]
    right_type: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_study_id: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_phenotype_id: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_bio_feature: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_lead_chrom: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_lead_pos: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_lead_ref: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    right_lead_alt: Option<Scalar>,
    #[serde(deserialize_with = "nullable")]
    method: Option<Scalar>,
    out: String,
    log: String,
    tmpdir: String,
    #[serde(default)]
    plot: Option<String>,
}

impl From<ManifestEntry> for JobDescriptor {
    fn from(e: ManifestEntry) -> Self {
        JobDescriptor {
            left: JobSide {
                sumstats: e.left_sumstats,
                ld: e.left_ld,
                dataset_type: text(e.left_type),
                study_id: text(e.left_study_id),
                phenotype_id: text(e.left_phenotype_id),
                bio_feature: text(e.left_bio_feature),
                lead_chrom: text(e.left_lead_chrom),
                lead_pos: text(e.left_lead_pos),
                lead_ref: text(e.left_lead_ref),
                lead_alt: text(e.left_lead_alt),
            },
            right: JobSide {
                sumstats: e.right_sumstats,
                ld: e.right_ld,
                dataset_type: text(e.right_type),
                study_id: text(e.right_study_id),
                phenotype_id: text(e.right_phenotype_id),
                bio_feature: text(e.right_bio_feature),
                lead_chrom: text(e.right_lead_chrom),
                lead_pos: text(e.right_lead_pos),
                lead_ref: text(e.right_lead_ref),
                lead_alt: text(e.right_lead_alt),
            },
            method: text(e.method),
            out: e.out,
            log: e.log,
            tmpdir: e.tmpdir,
            plot: e.plot,
        }
    }
}

/// Streaming manifest reader; yields one job per non-blank line
pub struct ManifestReader<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl ManifestReader<Box<dyn BufRead + Send>> {
    /// Open a manifest file, gzip-compressed or plain
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestParseError> {
        Ok(Self::new(open_text(path.as_ref())?))
    }
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<JobDescriptor, ManifestParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Some(
                serde_json::from_str::<ManifestEntry>(trimmed)
                    .map(JobDescriptor::from)
                    .map_err(|source| ManifestParseError::InvalidEntry {
                        line: self.line_no,
                        source,
                    }),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A manifest line in the shape written by the overlap-table step
    pub fn manifest_line(id: usize, out: &str) -> String {
        serde_json::json!({
            "left_sumstats": format!("sumstats/gwas/GCST{}.parquet", id),
            "left_ld": "ld/ukb_v3_chr1.downsampled10k",
            "left_type": "gwas",
            "left_study_id": format!("GCST{}", id),
            "left_phenotype_id": null,
            "left_bio_feature": null,
            "left_lead_chrom": "1",
            "left_lead_pos": 1_000_000 + id,
            "left_lead_ref": "A",
            "left_lead_alt": "G",
            "right_sumstats": "sumstats/molecular_trait/eQTLGen.parquet",
            "right_ld": "ld/ukb_v3_chr1.downsampled10k",
            "right_type": "eqtl",
            "right_study_id": "eQTLGen",
            "right_phenotype_id": "ENSG00000187634",
            "right_bio_feature": "UBERON_0000178",
            "right_lead_chrom": 1,
            "right_lead_pos": 1_000_500,
            "right_lead_ref": "C",
            "right_lead_alt": "T",
            "method": "conditional",
            "out": out,
            "log": format!("logs/{}.log", id),
            "tmpdir": format!("tmp/{}", id),
            "plot": format!("plots/{}.png", id),
        })
        .to_string()
    }
}
