use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pairprep::adapter::{kill_running_groups, rename_tree};
use pairprep::engine::progress::{self, ProgressReceiver};
use pairprep::prelude::*;
use pairprep::{ProgressEvent, RunError};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

/// Config file picked up from the current directory when `--config` is absent
const DEFAULT_CONFIG: &str = "pairprep.yaml";

/// Exit status after a second interrupt (128 + SIGINT)
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Parser)]
#[command(name = "pairprep")]
#[command(about = "Prepare molecule-pair simulation inputs from a sample table", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every sample of the input table
    Run {
        /// Sample table with sample, CID_A and CID_B columns
        #[arg(long, default_value = "Mol.csv")]
        csv: PathBuf,

        /// Template directory deployed into every sample (overrides config)
        #[arg(short, long)]
        template_dir: Option<PathBuf>,

        /// Path to the pipeline config file (default: ./pairprep.yaml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory under which sample workspaces are created (overrides config)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Directory for run logs and reports (overrides config)
        #[arg(short, long)]
        log_dir: Option<PathBuf>,

        /// Fail a sample when template deployment fails
        #[arg(long)]
        strict_deploy: bool,

        /// Reprocess samples whose outputs already exist
        #[arg(short, long)]
        force: bool,
    },

    /// Check the sample table and config without running anything
    Validate {
        #[arg(long, default_value = "Mol.csv")]
        csv: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Report which external tools are available on PATH
    CheckTools {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Set the residue name of every .mol2 file under a directory to its file stem
    Rename {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

fn tracing_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "pairprep=debug" } else { "pairprep=info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            init_tracing(verbose);
            tracing::warn!(error = %e, "OTLP exporter unavailable, tracing to console only");
            return;
        }
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("pairprep");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(tracing_filter(verbose))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    init_otel_tracing(cli.verbose);

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "pairprep failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run {
            csv,
            template_dir,
            config,
            workdir,
            log_dir,
            strict_deploy,
            force,
        } => {
            let mut pipeline_config = load_config(config.as_deref())?;
            if let Some(dir) = template_dir {
                pipeline_config.template_dir = dir;
            }
            if let Some(dir) = workdir {
                pipeline_config.workdir = dir;
            }
            if let Some(dir) = log_dir {
                pipeline_config.log_dir = dir;
            }
            if strict_deploy {
                pipeline_config.deploy_policy = DeployPolicy::Strict;
            }
            if force {
                pipeline_config.skip_completed = false;
            }
            run_batch(&csv, pipeline_config).await
        }
        Commands::Validate { csv, config } => validate(&csv, config.as_deref()),
        Commands::CheckTools { config } => {
            let config = load_config(config.as_deref())?;
            Ok(check_tools(&config))
        }
        Commands::Rename { dir } => rename(&dir),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, RunError> {
    match path {
        Some(path) => Ok(PipelineConfig::load(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(PipelineConfig::load(DEFAULT_CONFIG)?),
        None => Ok(PipelineConfig::default()),
    }
}

/// Print the PATH status of every configured program; true when all are found
fn check_tools(config: &PipelineConfig) -> bool {
    let mut all_found = true;
    for program in config.programs() {
        match which::which(&program) {
            Ok(path) => {
                tracing::debug!("Found {} at {}", program, path.display());
                println!("  ✓ {} ({})", program, path.display());
            }
            Err(_) => {
                all_found = false;
                tracing::warn!("External tool not found on PATH: {}", program);
                println!("  ✗ {} (not found)", program);
            }
        }
    }
    all_found
}

#[tracing::instrument(skip_all, fields(csv = %csv.display()))]
async fn run_batch(csv: &Path, config: PipelineConfig) -> anyhow::Result<bool> {
    let samples = SampleRegistry::load_file(csv).map_err(RunError::from)?;
    let run_log = RunLog::create(&config.log_dir).map_err(|error| RunError::RunLog {
        path: config.log_dir.display().to_string(),
        error,
    })?;

    run_log.info(&format!(
        "Run {} started: {} samples from {}",
        run_log.run_id(),
        samples.len(),
        csv.display()
    ));

    println!("Checking external tools:");
    if !check_tools(&config) {
        run_log.warn("Some external tools are missing; the affected stages will fail");
    }
    println!();

    let pipeline = StagePipeline::from_config(&config).map_err(RunError::from)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let interrupt = {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !cancelled.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        "Interrupt received; finishing the current sample (interrupt again to abort)"
                    );
                    continue;
                }
                tracing::error!("Second interrupt received; aborting");
                kill_running_groups();
                std::process::exit(INTERRUPTED_EXIT);
            }
        })
    };

    let (progress_tx, progress_rx) = progress::channel();
    let renderer = tokio::spawn(render_progress(progress_rx, std::io::stderr().is_terminal()));

    let orchestrator = Orchestrator::new(pipeline, &config.workdir)
        .reserve(config.log_dir.clone())
        .skip_completed(config.skip_completed)
        .cancel_flag(cancelled.clone())
        .progress(progress_tx);

    let outcomes = orchestrator.run(&samples, &run_log).await;
    drop(orchestrator);
    let _ = renderer.await;
    interrupt.abort();

    let stats = RunReporter::summarize(&outcomes);

    let errors_path = run_log.sibling("errors", "txt");
    match RunReporter::write_error_list(&outcomes, &errors_path) {
        Ok(0) => {}
        Ok(count) => run_log.info(&format!(
            "{} samples listed in {}",
            count,
            errors_path.display()
        )),
        Err(e) => run_log.error(&format!("Could not write {}: {}", errors_path.display(), e)),
    }

    let report_path = run_log.sibling("processing_report", "txt");
    if let Err(e) = RunReporter::write_report(
        &outcomes,
        &stats,
        chrono::Local::now(),
        &[run_log.path(), errors_path.as_path()],
        &report_path,
    ) {
        run_log.error(&format!("Could not write {}: {}", report_path.display(), e));
    }

    let summary_path = run_log.sibling("summary", "json");
    if let Err(e) =
        RunReporter::write_summary_json(&outcomes, &stats, run_log.run_id(), &summary_path)
    {
        run_log.error(&format!("Could not write {}: {}", summary_path.display(), e));
    }

    let summary = RunReporter::render_summary(&stats);
    for line in summary.lines() {
        run_log.info(line);
    }
    println!("\n=== Results ===\n");
    println!("{}", summary);
    if cancelled.load(Ordering::SeqCst) {
        println!("\n=== Run cancelled ===");
    }
    println!("\nReport: {}", report_path.display());
    if stats.failed + stats.skipped > 0 {
        println!("Error list: {}", errors_path.display());
    }

    let log_path = run_log.path().to_path_buf();
    if let Err(e) = run_log.close() {
        tracing::warn!("Could not sync {}: {}", log_path.display(), e);
    }

    Ok(true)
}

async fn render_progress(mut events: ProgressReceiver, interactive: bool) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Started { total } if interactive => {
                let pb = ProgressBar::new(total as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("  {bar:30.cyan/blue} {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("━╸ "),
                );
                pb.enable_steady_tick(Duration::from_millis(200));
                bar = Some(pb);
            }
            ProgressEvent::SampleStarted { key, .. } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("sample {}", key));
                }
            }
            ProgressEvent::SampleFinished {
                key,
                outcome,
                remaining,
                ..
            } => {
                if let Some(pb) = &bar {
                    pb.inc(1);
                    let eta = remaining
                        .map(|d| format!(" (about {}s left)", d.as_secs()))
                        .unwrap_or_default();
                    pb.set_message(format!("sample {} {}{}", key, outcome.label(), eta));
                }
            }
            ProgressEvent::Finished { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
            }
            _ => {}
        }
    }

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
}

fn validate(csv: &Path, config: Option<&Path>) -> anyhow::Result<bool> {
    let mut problems = 0;

    let config = match load_config(config) {
        Ok(config) => {
            println!("  ✓ configuration");
            config
        }
        Err(e) => {
            problems += 1;
            println!("  ✗ configuration: {}", e);
            PipelineConfig::default()
        }
    };

    match SampleRegistry::load_file(csv) {
        Ok(samples) => println!("  ✓ {}: {} samples", csv.display(), samples.len()),
        Err(e) => {
            problems += 1;
            println!("  ✗ {}: {}", csv.display(), e);
        }
    }

    if config.template_dir.is_dir() {
        println!("  ✓ template directory {}", config.template_dir.display());
    } else {
        problems += 1;
        println!(
            "  ✗ template directory {} not found",
            config.template_dir.display()
        );
    }

    if problems == 0 {
        println!("\nAll checks passed");
    } else {
        println!("\n{} problem(s) found", problems);
    }
    Ok(problems == 0)
}

fn rename(dir: &Path) -> anyhow::Result<bool> {
    if !dir.is_dir() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let summary = rename_tree(dir);
    for (path, reason) in &summary.failed {
        println!("  ✗ {}: {}", path.display(), reason);
    }

    if summary.renamed.is_empty() && summary.failed.is_empty() {
        println!("No .mol2 files found in {}", dir.display());
    } else {
        println!("Renamed residues in {} mol2 files", summary.renamed.len());
    }
    Ok(true)
}
