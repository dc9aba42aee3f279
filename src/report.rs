// ==============================================================================
// report.rs - Pipeline Run Reports
// ==============================================================================
// Description: Run identity, input digests and per-stage row counts for each
//              invocation of the pipeline
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::validator::ValidatedInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    MakeCommands,
    ProcessResults,
}

/// Row counts after each consolidation stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub rows_read: u64,
    /// Rows dropped for a null identity field
    pub malformed: u64,
    pub after_quality_filter: u64,
    pub after_symmetrise: u64,
    pub after_orientation_filter: u64,
    pub after_deduplication: u64,
    pub rows_written: u64,
    pub files_written: u64,
}

impl StageCounts {
    /// Sum counts gathered by independent workers
    pub fn merge(self, other: Self) -> Self {
        Self {
            rows_read: self.rows_read + other.rows_read,
            malformed: self.malformed + other.malformed,
            after_quality_filter: self.after_quality_filter + other.after_quality_filter,
            after_symmetrise: self.after_symmetrise + other.after_symmetrise,
            after_orientation_filter: self.after_orientation_filter
                + other.after_orientation_filter,
            after_deduplication: self.after_deduplication + other.after_deduplication,
            rows_written: self.rows_written + other.rows_written,
            files_written: self.files_written + other.files_written,
        }
    }
}

/// Classification totals from the manifest expander
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCounts {
    pub todo: u64,
    pub done: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub kind: RunKind,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub settings: serde_json::Value,
    pub inputs: Vec<ValidatedInput>,
    pub outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<StageCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandCounts>,
}

impl RunReport {
    pub fn new(kind: RunKind, settings: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            finished_at: None,
            settings,
            inputs: Vec::new(),
            outputs: Vec::new(),
            stages: None,
            commands: None,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Log a one-line summary of the run
    pub fn log(&self) {
        let elapsed = self
            .finished_at
            .map(|f| (f - self.started_at).num_milliseconds())
            .unwrap_or_default();

        if let Some(stages) = &self.stages {
            info!(
                run_id = %self.id,
                elapsed_ms = elapsed,
                rows_read = stages.rows_read,
                malformed = stages.malformed,
                after_quality_filter = stages.after_quality_filter,
                after_symmetrise = stages.after_symmetrise,
                after_orientation_filter = stages.after_orientation_filter,
                after_deduplication = stages.after_deduplication,
                rows_written = stages.rows_written,
                files_written = stages.files_written,
                "Results consolidation finished"
            );
        }
        if let Some(commands) = &self.commands {
            info!(
                run_id = %self.id,
                elapsed_ms = elapsed,
                todo = commands.todo,
                done = commands.done,
                "Command expansion finished"
            );
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report {}", path.display()))?;
        Ok(())
    }
}
