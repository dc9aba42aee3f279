// ==============================================================================
// config.rs - Pipeline Configuration
// ==============================================================================
// Description: Settings for manifest expansion and results consolidation
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::output::OutputFormat;

/// Configuration errors, reported before any I/O
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

/// Settings baked into every command produced by the manifest expander
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpanderConfig {
    /// Interpreter used to launch the wrapper script
    pub interpreter: String,

    /// Coloc wrapper script
    pub wrapper_script: PathBuf,

    /// R script that runs the coloc test
    pub r_script: PathBuf,

    /// Per-chromosome top loci table; `CHROM` is substituted by the wrapper
    pub top_loci_template: PathBuf,

    /// Colocalisation window in kb
    pub window_coloc_kb: u32,

    /// Conditional analysis window in kb
    pub window_cond_kb: u32,

    /// Minimum minor allele frequency
    pub min_maf: f64,

    /// Pass `--plot` to the wrapper
    pub make_plots: bool,

    /// Base for resolving relative paths, captured once per run
    pub working_dir: PathBuf,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            wrapper_script: PathBuf::from("scripts/coloc_wrapper.py"),
            r_script: PathBuf::from("scripts/coloc.R"),
            top_loci_template: PathBuf::from("data/finemapping/top_loci_by_chrom/CHROM.json"),
            window_coloc_kb: 500,
            window_cond_kb: 1000,
            min_maf: 0.01,
            make_plots: false,
            working_dir: PathBuf::from("/"),
        }
    }
}

impl ExpanderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::invalid("interpreter", "must not be empty"));
        }
        if self.window_coloc_kb == 0 {
            return Err(ConfigError::invalid("window_coloc_kb", "must be greater than 0"));
        }
        if self.window_cond_kb == 0 {
            return Err(ConfigError::invalid("window_cond_kb", "must be greater than 0"));
        }
        if !(0.0..0.5).contains(&self.min_maf) {
            return Err(ConfigError::invalid(
                "min_maf",
                format!("{} is outside [0, 0.5)", self.min_maf),
            ));
        }
        if !self.working_dir.is_absolute() {
            return Err(ConfigError::invalid(
                "working_dir",
                format!("{:?} is not absolute", self.working_dir),
            ));
        }
        Ok(())
    }
}

/// Results consolidation settings; each stage toggles independently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatorConfig {
    /// Add the mirrored (right as left) view of every test
    pub make_symmetric: bool,

    /// Keep only rows where left_type == "gwas"
    pub left_gwas_only: bool,

    /// Keep the best right dataset per left trait
    pub deduplicate_right: bool,

    /// Minimum overlapping variants; 0 disables the filter
    pub min_overlapping_vars: u64,

    /// Required prefix of every gene id in the lookup table
    pub gene_id_prefix: String,

    /// Upper bound on output part files
    pub partitions: usize,

    /// Worker threads, 0 for one per core
    pub threads: usize,

    /// Rows per decoded parquet batch
    pub batch_size: usize,

    pub format: OutputFormat,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            make_symmetric: true,
            left_gwas_only: true,
            deduplicate_right: true,
            min_overlapping_vars: 100,
            gene_id_prefix: "ENSG".to_string(),
            partitions: 200,
            threads: 0,
            batch_size: 8192,
            format: OutputFormat::Json,
        }
    }
}

impl ConsolidatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::invalid("partitions", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        Ok(())
    }

    /// True when a variant count passes the quality filter
    pub fn passes_quality(&self, n_vars: Option<i64>) -> bool {
        if self.min_overlapping_vars == 0 {
            return true;
        }
        match n_vars {
            Some(n) => n >= 0 && n as u64 >= self.min_overlapping_vars,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_threshold_is_inclusive() {
        let config = ConsolidatorConfig::default();
        assert!(!config.passes_quality(Some(99)));
        assert!(config.passes_quality(Some(100)));
        assert!(config.passes_quality(Some(5000)));
        assert!(!config.passes_quality(None));
        assert!(!config.passes_quality(Some(-1)));
    }

    #[test]
    fn test_disabled_quality_filter_passes_everything() {
        let config = ConsolidatorConfig {
            min_overlapping_vars: 0,
            ..Default::default()
        };
        assert!(config.passes_quality(None));
        assert!(config.passes_quality(Some(1)));
    }

    #[test]
    fn test_consolidator_validation() {
        assert!(ConsolidatorConfig::default().validate().is_ok());

        let config = ConsolidatorConfig {
            partitions: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "partitions", .. })
        ));
    }

    #[test]
    fn test_expander_validation() {
        assert!(ExpanderConfig::default().validate().is_ok());

        let config = ExpanderConfig {
            min_maf: 0.7,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExpanderConfig {
            working_dir: PathBuf::from("relative/dir"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
