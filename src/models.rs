// ==============================================================================
// models.rs - Colocalisation Data Models
// ==============================================================================
// Description: Trait descriptors, job descriptors and coloc result records
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Dataset type of a genome-wide association study
pub const GWAS_TYPE: &str = "gwas";

/// One side of a pairwise colocalisation test
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitDescriptor {
    /// Dataset type (e.g., "gwas", "eqtl", "pqtl")
    pub dataset_type: String,

    /// Study identifier
    pub study: String,

    /// Phenotype identifier (gene, transcript or trait id), usually null for GWAS
    pub phenotype: Option<String>,

    /// Biological feature (tissue or cell type), usually null for GWAS
    pub bio_feature: Option<String>,

    /// Lead variant chromosome
    pub chrom: String,

    /// Lead variant position
    pub pos: i64,

    /// Lead variant reference allele
    pub ref_allele: String,

    /// Lead variant alternate allele
    pub alt_allele: String,

    /// Ensembl gene id, filled in by gene enrichment
    pub gene_id: Option<String>,
}

impl TraitDescriptor {
    /// Lead variant locus in genomic sort order
    pub fn locus_key(&self) -> (ChromKey<'_>, i64, &str, &str) {
        (
            ChromKey::new(&self.chrom),
            self.pos,
            self.ref_allele.as_str(),
            self.alt_allele.as_str(),
        )
    }

    pub fn is_gwas(&self) -> bool {
        self.dataset_type == GWAS_TYPE
    }
}

/// Trait fields as read from the raw results, before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTrait {
    pub dataset_type: Option<String>,
    pub study: Option<String>,
    pub phenotype: Option<String>,
    pub bio_feature: Option<String>,
    pub chrom: Option<String>,
    pub pos: Option<i64>,
    pub ref_allele: Option<String>,
    pub alt_allele: Option<String>,
}

impl RawTrait {
    /// Returns None when the type, study or lead variant is null.
    ///
    /// Phenotype and bio feature stay nullable and group as equal values.
    pub fn into_descriptor(self) -> Option<TraitDescriptor> {
        Some(TraitDescriptor {
            dataset_type: self.dataset_type?,
            study: self.study?,
            phenotype: self.phenotype,
            bio_feature: self.bio_feature,
            chrom: self.chrom?,
            pos: self.pos?,
            ref_allele: self.ref_allele?,
            alt_allele: self.alt_allele?,
            gene_id: None,
        })
    }
}

/// One row of the raw coloc output (`PP.H0.abf` .. `PP.H4.abf`, `nsnps`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub left: RawTrait,
    pub right: RawTrait,
    /// Posterior probabilities H0..H4, in order
    pub posteriors: [Option<f64>; 5],
    pub nsnps: Option<i64>,
}

/// A completed pairwise colocalisation test with canonical column names
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub left: TraitDescriptor,
    pub right: TraitDescriptor,
    pub coloc_n_vars: Option<i64>,
    pub coloc_h0: Option<f64>,
    pub coloc_h1: Option<f64>,
    pub coloc_h2: Option<f64>,
    pub coloc_h3: Option<f64>,
    pub coloc_h4: Option<f64>,
    pub coloc_h4_h3: Option<f64>,
    pub coloc_log2_h4_h3: Option<f64>,
    /// True for records produced by swapping left and right
    pub is_flipped: bool,
}

impl ResultRecord {
    /// Renames the raw columns and computes the derived ratios.
    ///
    /// Returns None when a required identity field on either side is null;
    /// such rows cannot be grouped, mirrored or ordered.
    pub fn from_raw(raw: RawResult) -> Option<Self> {
        let [h0, h1, h2, h3, h4] = raw.posteriors;
        let coloc_h4_h3 = h4_h3_ratio(h4, h3);

        Some(Self {
            left: raw.left.into_descriptor()?,
            right: raw.right.into_descriptor()?,
            coloc_n_vars: raw.nsnps,
            coloc_h0: h0,
            coloc_h1: h1,
            coloc_h2: h2,
            coloc_h3: h3,
            coloc_h4: h4,
            coloc_h4_h3,
            coloc_log2_h4_h3: log2_ratio(coloc_h4_h3),
            is_flipped: false,
        })
    }

    /// Same test viewed from the other side
    pub fn mirror(&self) -> Self {
        let mut mirrored = self.clone();
        std::mem::swap(&mut mirrored.left, &mut mirrored.right);
        mirrored.is_flipped = !self.is_flipped;
        mirrored
    }

    pub fn is_left_gwas(&self) -> bool {
        self.left.is_gwas()
    }

    /// True when both sides describe the same trait at the same locus
    pub fn is_self_test(&self) -> bool {
        self.left == self.right
    }
}

/// h4 / h3, null when undefined or non-finite
pub fn h4_h3_ratio(h4: Option<f64>, h3: Option<f64>) -> Option<f64> {
    let ratio = h4? / h3?;
    ratio.is_finite().then_some(ratio)
}

/// log2 of a ratio, null for non-positive or null input
pub fn log2_ratio(ratio: Option<f64>) -> Option<f64> {
    ratio.filter(|r| *r > 0.0).map(f64::log2)
}

/// Natural chromosome ordering: 1..22, X, Y, MT, then anything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChromKey<'a> {
    Numeric(u32),
    Sex(u8),
    Mitochondrial,
    Other(&'a str),
}

impl<'a> ChromKey<'a> {
    pub fn new(chrom: &'a str) -> Self {
        let bare = chrom
            .strip_prefix("chr")
            .or_else(|| chrom.strip_prefix("CHR"))
            .unwrap_or(chrom);

        if let Ok(n) = bare.parse::<u32>() {
            return ChromKey::Numeric(n);
        }

        match bare {
            "X" | "x" => ChromKey::Sex(0),
            "Y" | "y" => ChromKey::Sex(1),
            "MT" | "M" | "mt" => ChromKey::Mitochondrial,
            _ => ChromKey::Other(chrom),
        }
    }
}

/// Orders two optional probabilities; null and NaN rank below any number
pub fn cmp_probability(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.filter(|v| !v.is_nan());
    let b = b.filter(|v| !v.is_nan());
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// One side of a job in the analysis manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSide {
    pub sumstats: String,
    pub ld: String,
    pub dataset_type: String,
    pub study_id: String,
    pub phenotype_id: String,
    pub bio_feature: String,
    pub lead_chrom: String,
    pub lead_pos: String,
    pub lead_ref: String,
    pub lead_alt: String,
}

/// One pairwise analysis request from the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub left: JobSide,
    pub right: JobSide,
    pub method: String,
    /// Output artifact written by the analysis
    pub out: String,
    pub log: String,
    pub tmpdir: String,
    pub plot: Option<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn raw_trait(dataset_type: &str, study: &str, chrom: &str, pos: i64) -> RawTrait {
        RawTrait {
            dataset_type: Some(dataset_type.to_string()),
            study: Some(study.to_string()),
            phenotype: Some(format!("{}_pheno", study)),
            bio_feature: Some(format!("{}_tissue", study)),
            chrom: Some(chrom.to_string()),
            pos: Some(pos),
            ref_allele: Some("A".to_string()),
            alt_allele: Some("G".to_string()),
        }
    }

    pub fn raw_result(left: RawTrait, right: RawTrait, h3: f64, h4: f64, nsnps: i64) -> RawResult {
        RawResult {
            left,
            right,
            posteriors: [Some(0.0), Some(0.05), Some(0.05), Some(h3), Some(h4)],
            nsnps: Some(nsnps),
        }
    }
}
