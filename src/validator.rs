// ==============================================================================
// validator.rs - Input File Validation
// ==============================================================================
// Description: Checks pipeline inputs exist, sniffs their encoding by magic
//              number and digests them for the run report
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const PARQUET_MAGIC: &[u8] = b"PAR1";

/// Encoding of an input file, detected from its first bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Gzip,
    Parquet,
    Plain,
}

/// An input that passed validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedInput {
    pub path: PathBuf,
    pub kind: FileKind,
    pub size: u64,
    pub sha256: String,
}

/// Detects gzip and parquet files by magic number
pub fn sniff(path: &Path) -> std::io::Result<FileKind> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 4];
    let mut filled = 0;

    // Short files are fine, they are just not gzip or parquet
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let magic = &buffer[..filled];
    Ok(if magic.starts_with(PARQUET_MAGIC) {
        FileKind::Parquet
    } else if magic.starts_with(GZIP_MAGIC) {
        FileKind::Gzip
    } else {
        FileKind::Plain
    })
}

/// Validates a single input file and digests it
pub fn validate_file(path: &Path) -> Result<ValidatedInput> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Input not found: {}", path.display()))?;

    if !metadata.is_file() {
        anyhow::bail!("Input is not a regular file: {}", path.display());
    }

    let kind = sniff(path).with_context(|| format!("Failed to read {}", path.display()))?;
    debug!("Sniffed {:?} as {:?}", path, kind);

    let sha256 = compute_sha256(path)?;

    Ok(ValidatedInput {
        path: path.to_path_buf(),
        kind,
        size: metadata.len(),
        sha256,
    })
}

/// Validates a results relation: one parquet file, or a directory searched
/// recursively for `*.parquet` parts (sorted by path)
pub fn validate_results_input(path: &Path) -> Result<Vec<ValidatedInput>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Results input not found: {}", path.display()))?;

    let candidates: Vec<PathBuf> = if metadata.is_dir() {
        let mut files = Vec::new();
        for entry in WalkDir::new(path).follow_links(true) {
            let entry = entry
                .with_context(|| format!("Failed to list results directory {}", path.display()))?;
            let is_part = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".parquet");
            if is_part {
                files.push(entry.into_path());
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    if candidates.is_empty() {
        anyhow::bail!("No parquet files found under {}", path.display());
    }

    let mut validated = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let input = validate_file(&candidate)?;
        if input.kind != FileKind::Parquet {
            anyhow::bail!(
                "Magic number mismatch: {} is not a parquet file",
                candidate.display()
            );
        }
        validated.push(input);
    }

    info!(
        "Validated {} results file(s), {} bytes total",
        validated.len(),
        validated.iter().map(|v| v.size).sum::<u64>()
    );

    Ok(validated)
}

fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
