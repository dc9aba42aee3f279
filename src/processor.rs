// ==============================================================================
// processor.rs - Coloc Results Consolidation
// ==============================================================================
// Description: Derives, filters, symmetrises, deduplicates and enriches raw
//              pairwise coloc results, then writes the ordered relation
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConsolidatorConfig;
use crate::models::{cmp_probability, ChromKey, RawResult, ResultRecord, TraitDescriptor};
use crate::output::OutputWriter;
use crate::parsers::{GeneMap, PhenotypeLookup, ResultsReadError, ResultsReader};
use crate::report::{RunKind, RunReport, StageCounts};
use crate::validator::{validate_file, validate_results_input};

/// Run report file name inside the output directory
pub const REPORT_FILE: &str = "_report.json";

/// Grouping key for right-side deduplication: the full left trait plus the
/// right trait without its locus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    left: TraitDescriptor,
    right_type: String,
    right_study: String,
    right_bio_feature: Option<String>,
    right_phenotype: Option<String>,
}

impl DedupKey {
    pub fn of(record: &ResultRecord) -> Self {
        Self {
            left: record.left.clone(),
            right_type: record.right.dataset_type.clone(),
            right_study: record.right.study.clone(),
            right_bio_feature: record.right.bio_feature.clone(),
            right_phenotype: record.right.phenotype.clone(),
        }
    }
}

/// Preference order within a dedup group; `Less` means `a` wins.
///
/// h4 descending (null and NaN last), then right locus ascending, then
/// originals before mirrors, then n_vars descending, then h3, h2, h1, h0
/// descending.
pub fn rank(a: &ResultRecord, b: &ResultRecord) -> Ordering {
    cmp_probability(b.coloc_h4, a.coloc_h4)
        .then_with(|| a.right.locus_key().cmp(&b.right.locus_key()))
        .then_with(|| a.right.chrom.cmp(&b.right.chrom))
        .then_with(|| a.is_flipped.cmp(&b.is_flipped))
        .then_with(|| b.coloc_n_vars.cmp(&a.coloc_n_vars))
        .then_with(|| cmp_probability(b.coloc_h3, a.coloc_h3))
        .then_with(|| cmp_probability(b.coloc_h2, a.coloc_h2))
        .then_with(|| cmp_probability(b.coloc_h1, a.coloc_h1))
        .then_with(|| cmp_probability(b.coloc_h0, a.coloc_h0))
}

fn cmp_identity(a: &TraitDescriptor, b: &TraitDescriptor) -> Ordering {
    a.dataset_type
        .cmp(&b.dataset_type)
        .then_with(|| a.study.cmp(&b.study))
        .then_with(|| a.phenotype.cmp(&b.phenotype))
        .then_with(|| a.bio_feature.cmp(&b.bio_feature))
}

/// Null phenotypes stay null
fn gene_id(genes: &dyn PhenotypeLookup, side: &TraitDescriptor) -> Option<String> {
    side.phenotype.as_deref().map(|p| genes.lookup(p).to_string())
}

/// Output order: left (chrom, pos) in natural chromosome order, then the
/// remaining identity fields, then group preference
pub fn output_order(a: &ResultRecord, b: &ResultRecord) -> Ordering {
    ChromKey::new(&a.left.chrom)
        .cmp(&ChromKey::new(&b.left.chrom))
        .then_with(|| a.left.chrom.cmp(&b.left.chrom))
        .then_with(|| a.left.pos.cmp(&b.left.pos))
        .then_with(|| a.left.ref_allele.cmp(&b.left.ref_allele))
        .then_with(|| a.left.alt_allele.cmp(&b.left.alt_allele))
        .then_with(|| cmp_identity(&a.left, &b.left))
        .then_with(|| cmp_identity(&a.right, &b.right))
        .then_with(|| rank(a, b))
}

/// The record itself, followed by its mirror when symmetrising
pub fn symmetrise(record: ResultRecord, enabled: bool) -> impl Iterator<Item = ResultRecord> {
    let mirror = enabled.then(|| record.mirror());
    std::iter::once(record).chain(mirror)
}

enum Survivors {
    /// Current winner per dedup group
    Deduplicated(HashMap<DedupKey, ResultRecord>),
    All(Vec<ResultRecord>),
}

impl Survivors {
    fn insert(&mut self, candidate: ResultRecord) {
        match self {
            Survivors::Deduplicated(groups) => match groups.entry(DedupKey::of(&candidate)) {
                Entry::Occupied(mut best) => {
                    if rank(&candidate, best.get()) == Ordering::Less {
                        best.insert(candidate);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(candidate);
                }
            },
            Survivors::All(records) => records.push(candidate),
        }
    }

    fn len(&self) -> usize {
        match self {
            Survivors::Deduplicated(groups) => groups.len(),
            Survivors::All(records) => records.len(),
        }
    }

    fn into_records(self) -> Vec<ResultRecord> {
        match self {
            Survivors::Deduplicated(groups) => groups.into_values().collect(),
            Survivors::All(records) => records,
        }
    }
}

/// Per-worker state for stages 1 to 5
pub struct StageAccumulator {
    counts: StageCounts,
    survivors: Survivors,
}

impl StageAccumulator {
    pub fn new(deduplicate: bool) -> Self {
        let survivors = if deduplicate {
            Survivors::Deduplicated(HashMap::new())
        } else {
            Survivors::All(Vec::new())
        };

        Self {
            counts: StageCounts::default(),
            survivors,
        }
    }

    /// Run one raw row through derive, quality filter, symmetrise and the
    /// orientation filter, and fold the survivors into the dedup table
    pub fn absorb(&mut self, raw: RawResult, config: &ConsolidatorConfig) {
        self.counts.rows_read += 1;

        let Some(record) = ResultRecord::from_raw(raw) else {
            self.counts.malformed += 1;
            return;
        };

        if !config.passes_quality(record.coloc_n_vars) {
            return;
        }
        self.counts.after_quality_filter += 1;

        for candidate in symmetrise(record, config.make_symmetric) {
            self.counts.after_symmetrise += 1;

            if config.left_gwas_only && !candidate.is_left_gwas() {
                continue;
            }
            self.counts.after_orientation_filter += 1;

            self.survivors.insert(candidate);
        }
    }

    /// Combine two workers' state; the larger table absorbs the smaller
    pub fn merge(self, other: Self) -> Self {
        let counts = self.counts.merge(other.counts);
        let (mut into, from) = if self.survivors.len() >= other.survivors.len() {
            (self.survivors, other.survivors)
        } else {
            (other.survivors, self.survivors)
        };

        for record in from.into_records() {
            into.insert(record);
        }

        Self {
            counts,
            survivors: into,
        }
    }
}

/// Explicit per-run state: settings, the shared gene lookup and the worker pool
pub struct RunContext {
    pub config: ConsolidatorConfig,
    pub genes: Arc<dyn PhenotypeLookup>,
    pool: rayon::ThreadPool,
}

impl RunContext {
    pub fn new(config: ConsolidatorConfig, genes: Arc<dyn PhenotypeLookup>) -> Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("coloc-worker-{}", i))
            .build()
            .context("Failed to build worker thread pool")?;

        debug!("Worker pool ready with {} threads", pool.current_num_threads());

        Ok(Self {
            config,
            genes,
            pool,
        })
    }
}

/// Ordered, enriched records plus the counts that produced them
#[derive(Debug)]
pub struct Consolidated {
    pub counts: StageCounts,
    pub records: Vec<ResultRecord>,
}

pub struct ResultsConsolidator {
    ctx: RunContext,
}

impl ResultsConsolidator {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Consolidate rows already in memory
    pub fn consolidate(&self, rows: Vec<RawResult>) -> Consolidated {
        let config = &self.ctx.config;
        let dedup = config.deduplicate_right;

        let acc = self.ctx.pool.install(|| {
            rows.into_par_iter()
                .fold(
                    || StageAccumulator::new(dedup),
                    |mut acc, raw| {
                        acc.absorb(raw, config);
                        acc
                    },
                )
                .reduce(|| StageAccumulator::new(dedup), StageAccumulator::merge)
        });

        self.finish(acc)
    }

    /// Consolidate a parquet relation, one row group per work unit
    pub fn consolidate_units(&self, reader: &ResultsReader) -> Result<Consolidated> {
        let config = &self.ctx.config;
        let dedup = config.deduplicate_right;
        let units = reader.scan_units().context("Failed to plan results scan")?;

        let acc = self
            .ctx
            .pool
            .install(|| {
                units
                    .par_iter()
                    .try_fold(
                        || StageAccumulator::new(dedup),
                        |mut acc, unit| -> Result<StageAccumulator, ResultsReadError> {
                            for batch in reader.read_unit(unit)? {
                                for raw in batch? {
                                    acc.absorb(raw, config);
                                }
                            }
                            Ok(acc)
                        },
                    )
                    .try_reduce(|| StageAccumulator::new(dedup), |a, b| Ok(a.merge(b)))
            })
            .context("Failed to read coloc results")?;

        Ok(self.finish(acc))
    }

    /// Stages 6 and 7: gene enrichment and output ordering
    fn finish(&self, acc: StageAccumulator) -> Consolidated {
        let mut counts = acc.counts;
        let mut records = acc.survivors.into_records();
        counts.after_deduplication = records.len() as u64;

        info!("Read {} raw rows ({} malformed)", counts.rows_read, counts.malformed);
        info!("After quality filter: {} rows", counts.after_quality_filter);
        info!("After symmetrise: {} rows", counts.after_symmetrise);
        info!("After orientation filter: {} rows", counts.after_orientation_filter);
        info!("After deduplication: {} rows", counts.after_deduplication);
        if !self.ctx.config.deduplicate_right {
            warn!(
                "Deduplication is off; sorting all {} rows in memory",
                records.len()
            );
        }

        let genes = self.ctx.genes.as_ref();
        self.ctx.pool.install(|| {
            records.par_iter_mut().for_each(|record| {
                record.left.gene_id = gene_id(genes, &record.left);
                record.right.gene_id = gene_id(genes, &record.right);
            });
            records.par_sort_unstable_by(output_order);
        });

        Consolidated { counts, records }
    }
}

/// Run the whole consolidation: validate inputs, load the gene lookup,
/// consolidate, write parts, the run report and finally the success marker
///
/// # Arguments
/// * `input` - Parquet file or directory of parquet files
/// * `gene_map` - Phenotype -> gene lookup table
/// * `output` - Output directory, replaced if present
pub fn process_results(
    input: &Path,
    gene_map: &Path,
    output: &Path,
    config: ConsolidatorConfig,
) -> Result<RunReport> {
    config.validate()?;
    info!("Consolidating coloc results from {:?}", input);
    info!("Settings: {:?}", config);

    let settings = serde_json::to_value(&config).context("Failed to serialize settings")?;
    let mut report = RunReport::new(RunKind::ProcessResults, settings);

    let mut inputs = validate_results_input(input)?;
    let files = inputs.iter().map(|i| i.path.clone()).collect();
    inputs.push(validate_file(gene_map)?);

    // Fatal lookup problems must surface before the old output is removed
    let genes = GeneMap::load(gene_map, &config.gene_id_prefix)
        .with_context(|| format!("Failed to load gene lookup {}", gene_map.display()))?;

    let reader = ResultsReader::open(files, config.batch_size)
        .context("Failed to open coloc results")?;

    let writer = OutputWriter::new(output, config.format, config.partitions);
    let consolidator = ResultsConsolidator::new(RunContext::new(config, Arc::new(genes))?);

    let Consolidated {
        mut counts,
        records,
    } = consolidator.consolidate_units(&reader)?;

    let parts = writer.write(&records)?;
    counts.rows_written = records.len() as u64;
    counts.files_written = parts.len() as u64;

    report.inputs = inputs;
    report.outputs = parts;
    report.stages = Some(counts);
    let report = report.finish();

    report.write_json(&writer.output_dir().join(REPORT_FILE))?;
    writer.commit()?;
    report.log();

    Ok(report)
}
