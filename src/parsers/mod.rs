// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Readers for the job manifest, gene lookup and raw coloc results
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

pub mod gene_map;
pub mod manifest;
pub mod results;

pub use gene_map::{GeneMap, GeneMapError, PhenotypeLookup};
pub use manifest::{ManifestParseError, ManifestReader};
pub use results::{ResultsReadError, ResultsReader, ScanUnit};

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::validator::{sniff, FileKind};

/// Open a text file for line reading, transparently decompressing gzip
pub fn open_text(path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
    let kind = sniff(path)?;
    let file = File::open(path)?;

    Ok(match kind {
        FileKind::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        FileKind::Parquet | FileKind::Plain => Box::new(BufReader::new(file)),
    })
}
