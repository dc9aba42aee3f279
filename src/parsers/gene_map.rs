// ==============================================================================
// gene_map.rs - Phenotype to Gene Lookup Parser
// ==============================================================================
// Description: Loads the phenotype_id -> gene_id table used to enrich results
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Format: tab-delimited with header (gzip or plain); column order is taken
// from the header
// Example:
//   phenotype_id	gene_id	chromosome	start
//   ILMN_1343291	ENSG00000156508	6	73515750
//   ENSG00000187634	ENSG00000187634	1	934342
// ==============================================================================

use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::parsers::open_text;

const PHENOTYPE_COLUMN: &str = "phenotype_id";
const GENE_COLUMN: &str = "gene_id";

/// Errors that can occur while loading the lookup table
#[derive(Error, Debug)]
pub enum GeneMapError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Lookup header is missing the '{0}' column")]
    MissingColumn(&'static str),

    #[error("Lookup row at line {line} has {found} fields, expected at least {expected}")]
    ShortRow {
        line: u64,
        found: usize,
        expected: usize,
    },

    #[error("Gene id '{gene_id}' at line {line} does not start with '{prefix}'")]
    InvalidGeneId {
        line: u64,
        gene_id: String,
        prefix: String,
    },
}

/// Read-only phenotype -> gene capability shared by all workers
pub trait PhenotypeLookup: Send + Sync {
    /// Gene id mapped to a phenotype, if any
    fn gene_id(&self, phenotype_id: &str) -> Option<&str>;

    /// Gene id for a phenotype, falling back to the phenotype id itself
    fn lookup<'a>(&'a self, phenotype_id: &'a str) -> &'a str {
        self.gene_id(phenotype_id).unwrap_or(phenotype_id)
    }
}

/// Phenotype -> Ensembl gene id map
#[derive(Debug, Clone, Default)]
pub struct GeneMap {
    genes: HashMap<String, String>,
}

impl GeneMap {
    /// Load the lookup table from disk
    ///
    /// # Arguments
    /// * `path` - Tab-delimited table, optionally gzip-compressed
    /// * `prefix` - Every gene id must start with this (e.g., "ENSG")
    ///
    /// # Returns
    /// * `Err(GeneMapError::InvalidGeneId)` if any gene id breaks the prefix
    ///   convention; the whole table is rejected, not the row
    pub fn load(path: impl AsRef<Path>, prefix: &str) -> Result<Self, GeneMapError> {
        let path = path.as_ref();
        let map = Self::from_reader(open_text(path)?, prefix)?;

        info!("Loaded {} phenotype -> gene mappings from {:?}", map.len(), path);
        Ok(map)
    }

    /// Parse a lookup table from any reader
    pub fn from_reader<R: Read>(reader: R, prefix: &str) -> Result<Self, GeneMapError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or(GeneMapError::MissingColumn(name))
        };
        let phenotype_idx = column(PHENOTYPE_COLUMN)?;
        let gene_idx = column(GENE_COLUMN)?;
        let expected = phenotype_idx.max(gene_idx) + 1;

        let mut genes = HashMap::new();
        for result in reader.records() {
            let record = result?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            if record.len() == 1 && record.get(0).is_some_and(|f| f.trim().is_empty()) {
                continue;
            }

            let (Some(phenotype_id), Some(gene_id)) = (record.get(phenotype_idx), record.get(gene_idx))
            else {
                return Err(GeneMapError::ShortRow {
                    line,
                    found: record.len(),
                    expected,
                });
            };

            let gene_id = gene_id.trim();
            if !gene_id.starts_with(prefix) {
                return Err(GeneMapError::InvalidGeneId {
                    line,
                    gene_id: gene_id.to_string(),
                    prefix: prefix.to_string(),
                });
            }

            // Later rows win for repeated phenotype ids
            genes.insert(phenotype_id.trim().to_string(), gene_id.to_string());
        }

        Ok(Self { genes })
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

impl FromIterator<(String, String)> for GeneMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            genes: iter.into_iter().collect(),
        }
    }
}

impl PhenotypeLookup for GeneMap {
    fn gene_id(&self, phenotype_id: &str) -> Option<&str> {
        self.genes.get(phenotype_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const TABLE: &str = "\
chromosome\tgene_id\tphenotype_id\tstart
6\tENSG00000156508\tILMN_1343291\t73515750
1\tENSG00000187634\tENSG00000187634\t934342
";

    #[test]
    fn test_header_defines_column_order() {
        let map = GeneMap::from_reader(Cursor::new(TABLE), "ENSG").unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.gene_id("ILMN_1343291"), Some("ENSG00000156508"));
        assert_eq!(map.lookup("ILMN_1343291"), "ENSG00000156508");
    }

    #[test]
    fn test_identity_fallback() {
        let map = GeneMap::from_reader(Cursor::new(TABLE), "ENSG").unwrap();

        assert_eq!(map.gene_id("ILMN_9999999"), None);
        assert_eq!(map.lookup("ILMN_9999999"), "ILMN_9999999");
    }

    #[test]
    fn test_missing_gene_column() {
        let table = "phenotype_id\tsymbol\nILMN_1\tTP53\n";
        let result = GeneMap::from_reader(Cursor::new(table), "ENSG");
        assert!(matches!(result, Err(GeneMapError::MissingColumn("gene_id"))));
    }

    #[test]
    fn test_bad_gene_id_prefix_is_fatal() {
        let table = "phenotype_id\tgene_id\nILMN_1\tENSG00000141510\nILMN_2\tTP53\n";
        match GeneMap::from_reader(Cursor::new(table), "ENSG") {
            Err(GeneMapError::InvalidGeneId { line, gene_id, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(gene_id, "TP53");
            }
            other => panic!("Expected InvalidGeneId, got {:?}", other),
        }
    }

    #[test]
    fn test_short_row() {
        let table = "phenotype_id\tgene_id\nILMN_1\n";
        let result = GeneMap::from_reader(Cursor::new(table), "ENSG");
        assert!(matches!(result, Err(GeneMapError::ShortRow { expected: 2, .. })));
    }

    #[test]
    fn test_load_gzip_table() {
        let file = NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        encoder.write_all(TABLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let map = GeneMap::load(file.path(), "ENSG").unwrap();
        assert_eq!(map.lookup("ENSG00000187634"), "ENSG00000187634");
    }

    #[test]
    fn test_missing_table_is_io_error() {
        let result = GeneMap::load("/nonexistent/gene_metadata.txt.gz", "ENSG");
        assert!(matches!(result, Err(GeneMapError::IoError(_))));
    }
}
