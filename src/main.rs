use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, info};

use mitobatch::assembly::params::{
    DEFAULT_EXTENSION_ROUNDS, DEFAULT_K_MERS, DEFAULT_ORGANELLE_TYPE, DEFAULT_THREADS,
};
use mitobatch::assembly::{AssemblyExecutor, AssemblyParameters, CommandExecutor, DEFAULT_ASSEMBLER};
use mitobatch::batch::{BatchConfig, BatchOutcome, Dispatcher};
use mitobatch::report::{self, ReportPaths};
use mitobatch::{logging, manifest};

/// Exit code for errors that stop the batch before any sample runs
const EXIT_SETUP_FAILURE: u8 = 2;

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let val: usize = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val == 0 {
        Err("Concurrency must be at least 1".to_string())
    } else {
        Ok(val)
    }
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("Invalid number of seconds: {}", s))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("Timeout must be a positive number of seconds, got {}", s));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "mitobatch")]
#[command(version)]
#[command(about = "Batch organelle genome assembly with GetOrganelle")]
#[command(long_about = r#"
mitobatch - fault-tolerant batch runner for organelle genome assembly

Runs the assembler once per sample listed in a CSV manifest, optionally
several samples at a time, and writes a JSON summary plus a text digest.

MANIFEST FORMAT:
  Header row required. Columns:
    sample_id, forward_reads_path, reverse_reads_path   (required)
    k_mers, extension_rounds, organelle_type, threads  (optional, per-sample
                                                        overrides of the
                                                        batch-wide defaults)
  Unknown columns are ignored. Lines starting with '#' are comments.

OUTPUT:
  <output-dir>/<sample_id>_mt/               Assembler output per sample
  <output-dir>/batch_assembly_summary.json   Structured summary
  <output-dir>/batch_assembly_summary.txt    Text digest

EXIT CODES:
  0  every sample succeeded
  1  at least one sample failed, timed out or was skipped
  2  the manifest or configuration was unusable, or no sample could run
"#)]
struct Cli {
    /// Sample manifest (CSV)
    manifest: PathBuf,

    /// Number of samples assembled at the same time
    #[arg(long, default_value = "1", value_parser = parse_concurrency)]
    concurrency: usize,

    /// Per-sample time limit in seconds (unbounded if omitted)
    #[arg(long, value_name = "SECONDS", value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Keep processing after a sample fails (default)
    #[arg(long, conflicts_with = "stop_on_error")]
    continue_on_error: bool,

    /// Stop admitting samples after the first failure or timeout
    #[arg(long)]
    stop_on_error: bool,

    /// Base output directory
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Path of the JSON summary; the text digest is written next to it
    #[arg(long)]
    report_path: Option<PathBuf>,

    /// Assembler program to run
    #[arg(long, env = "MITOBATCH_ASSEMBLER", default_value = DEFAULT_ASSEMBLER)]
    assembler: String,

    /// Threads per sample
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: u32,

    /// K-mer values
    #[arg(long, default_value = DEFAULT_K_MERS)]
    kmer: String,

    /// Extension rounds
    #[arg(long, default_value_t = DEFAULT_EXTENSION_ROUNDS)]
    rounds: u32,

    /// Organelle type
    #[arg(long, default_value = DEFAULT_ORGANELLE_TYPE)]
    organelle_type: String,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(cli.verbose, cli.quiet) {
        eprintln!("warning: {err}");
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_SETUP_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let executor = Arc::new(CommandExecutor::new(cli.assembler.clone()));
    run_with_executor(cli, executor).await
}

async fn run_with_executor(cli: Cli, executor: Arc<dyn AssemblyExecutor>) -> Result<u8> {
    let defaults = AssemblyParameters {
        k_mers: cli.kmer,
        extension_rounds: cli.rounds,
        organelle_type: cli.organelle_type,
        threads: cli.threads,
    };
    let problems = defaults.check();
    if !problems.is_empty() {
        bail!("invalid default parameters: {}", problems.join("; "));
    }

    info!(manifest = %cli.manifest.display(), "Reading sample information");
    let samples = manifest::load(&cli.manifest)
        .with_context(|| format!("failed to load manifest {}", cli.manifest.display()))?;

    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("failed to create output directory {}", cli.output_dir.display()))?;

    info!(
        samples = samples.len(),
        threads = defaults.threads,
        k_mers = %defaults.k_mers,
        rounds = defaults.extension_rounds,
        organelle_type = %defaults.organelle_type,
        output_dir = %cli.output_dir.display(),
        assembler = %cli.assembler,
        "Batch parameters"
    );

    let continue_on_error = cli.continue_on_error || !cli.stop_on_error;
    let mut config = BatchConfig::default()
        .with_concurrency_limit(cli.concurrency)
        .with_continue_on_error(continue_on_error);
    if let Some(timeout) = cli.timeout {
        config = config.with_timeout(timeout);
    }

    let dispatcher = Dispatcher::new(executor, &cli.output_dir)
        .with_defaults(defaults)
        .with_progress_callback(|finished, total| {
            info!(finished = finished, total = total, "Batch progress");
        });

    let report = dispatcher.process(samples, &config).await;

    let paths = cli
        .report_path
        .map(ReportPaths::from_report_path)
        .unwrap_or_else(|| ReportPaths::in_dir(&cli.output_dir));
    report::write_artifacts(&report, &paths)
        .await
        .context("failed to write batch report")?;

    println!();
    println!("Results:");
    println!("  Total: {}", report.results.len());
    println!("  Succeeded: {}", report.counts.succeeded);
    println!("  Failed: {}", report.counts.failed);
    println!("  Timed out: {}", report.counts.timed_out);
    println!("  Skipped: {}", report.counts.skipped);

    if !report.failed_samples.is_empty() {
        println!("\nUnsuccessful samples:");
        for result in report.failures() {
            println!("  - {} ({})", result.sample_id, result.status);
        }
    }
    println!("\nSummary report saved to: {}", paths.text.display());

    let outcome = report.outcome();
    if outcome == BatchOutcome::NothingRan {
        error!("No valid samples found in the manifest");
    }

    Ok(outcome.exit_code())
}
