// ==============================================================================
// main.rs - Coloc Results Entry Point
// ==============================================================================
// Description: Command line entry for expanding the coloc job manifest and
//              consolidating raw coloc results
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coloc_results::commands::make_commands;
use coloc_results::config::{ConsolidatorConfig, ExpanderConfig};
use coloc_results::output::OutputFormat;
use coloc_results::processor::process_results;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "COLOC_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand the job manifest into todo and done command files
    MakeCommands(MakeCommandsArgs),

    /// Consolidate raw coloc results into the processed relation
    ProcessResults(ProcessResultsArgs),
}

#[derive(Args, Debug)]
struct MakeCommandsArgs {
    /// Job manifest (newline-delimited JSON, gzip or plain)
    #[arg(long, env = "COLOC_MANIFEST", default_value = "configs/manifest.json.gz")]
    manifest: PathBuf,

    /// Commands whose output is missing
    #[arg(long, env = "COLOC_TODO", default_value = "commands_todo.txt.gz")]
    todo: PathBuf,

    /// Commands whose output already exists
    #[arg(long, env = "COLOC_DONE", default_value = "commands_done.txt.gz")]
    done: PathBuf,

    #[arg(long, env = "COLOC_INTERPRETER", default_value = "python")]
    interpreter: String,

    #[arg(long, env = "COLOC_WRAPPER_SCRIPT", default_value = "scripts/coloc_wrapper.py")]
    wrapper_script: PathBuf,

    #[arg(long, env = "COLOC_R_SCRIPT", default_value = "scripts/coloc.R")]
    r_script: PathBuf,

    /// Per-chromosome top loci table, CHROM is filled in by the wrapper
    #[arg(
        long,
        env = "COLOC_TOP_LOCI",
        default_value = "data/finemapping/top_loci_by_chrom/CHROM.json"
    )]
    top_loci: PathBuf,

    /// Colocalisation window (kb)
    #[arg(long, env = "COLOC_WINDOW_COLOC", default_value_t = 500)]
    window_coloc: u32,

    /// Conditional analysis window (kb)
    #[arg(long, env = "COLOC_WINDOW_COND", default_value_t = 1000)]
    window_cond: u32,

    #[arg(long, env = "COLOC_MIN_MAF", default_value_t = 0.01)]
    min_maf: f64,

    /// Pass --plot to every command
    #[arg(long, env = "COLOC_PLOT")]
    plot: bool,

    /// Don't print todo commands to stdout
    #[arg(short, long, env = "COLOC_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct ProcessResultsArgs {
    /// Raw results: a parquet file or a directory of parquet files
    #[arg(long, env = "COLOC_RESULTS", default_value = "results/coloc_raw.parquet")]
    input: PathBuf,

    /// Output directory, replaced if it exists
    #[arg(long, env = "COLOC_OUTPUT", default_value = "results/coloc_processed.json")]
    output: PathBuf,

    /// Phenotype -> gene lookup (tab-delimited, gzip or plain)
    #[arg(long, env = "COLOC_GENE_MAP")]
    gene_map: PathBuf,

    /// Do not add the mirrored view of each test
    #[arg(long, env = "COLOC_NO_SYMMETRIC")]
    no_symmetric: bool,

    /// Keep rows whatever the left dataset type
    #[arg(long, env = "COLOC_ANY_LEFT_TYPE")]
    any_left_type: bool,

    /// Keep every right dataset, not only the best one
    #[arg(long, env = "COLOC_KEEP_ALL_RIGHT")]
    keep_all_right: bool,

    /// Minimum overlapping variants, 0 disables the filter
    #[arg(long, env = "COLOC_MIN_OVERLAPPING_VARS", default_value_t = 100)]
    min_overlapping_vars: u64,

    #[arg(long, env = "COLOC_GENE_ID_PREFIX", default_value = "ENSG")]
    gene_id_prefix: String,

    /// Upper bound on output part files
    #[arg(long, env = "COLOC_PARTITIONS", default_value_t = 200)]
    partitions: usize,

    /// Worker threads, 0 for one per core
    #[arg(long, env = "COLOC_THREADS", default_value_t = 0)]
    threads: usize,

    #[arg(long, env = "COLOC_BATCH_SIZE", default_value_t = 8192)]
    batch_size: usize,

    #[arg(long, env = "COLOC_FORMAT", value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

impl MakeCommandsArgs {
    fn config(&self) -> Result<ExpanderConfig> {
        let working_dir = std::env::current_dir().context("Failed to read working directory")?;

        Ok(ExpanderConfig {
            interpreter: self.interpreter.clone(),
            wrapper_script: self.wrapper_script.clone(),
            r_script: self.r_script.clone(),
            top_loci_template: self.top_loci.clone(),
            window_coloc_kb: self.window_coloc,
            window_cond_kb: self.window_cond,
            min_maf: self.min_maf,
            make_plots: self.plot,
            working_dir,
        })
    }
}

impl ProcessResultsArgs {
    fn config(&self) -> ConsolidatorConfig {
        ConsolidatorConfig {
            make_symmetric: !self.no_symmetric,
            left_gwas_only: !self.any_left_type,
            deduplicate_right: !self.keep_all_right,
            min_overlapping_vars: self.min_overlapping_vars,
            gene_id_prefix: self.gene_id_prefix.clone(),
            partitions: self.partitions,
            threads: self.threads,
            batch_size: self.batch_size,
            format: self.format,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "coloc_results=info".into());

    // stdout carries the todo echo, so logs go to stderr
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("coloc-results {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::MakeCommands(args) => {
            let config = args.config()?;
            tokio::task::spawn_blocking(move || {
                make_commands(&args.manifest, &args.todo, &args.done, &config, args.quiet)
            })
            .await
            .context("Command expansion task panicked")??;
        }
        Command::ProcessResults(args) => {
            let config = args.config();
            tokio::task::spawn_blocking(move || {
                process_results(&args.input, &args.gene_map, &args.output, config)
            })
            .await
            .context("Results consolidation task panicked")??;
        }
    }

    Ok(())
}
