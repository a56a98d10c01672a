//! CAS striking analyser - command-line entry point
//!
//! Reads a CAS, Lowndes or Bagley striking file, runs it through the
//! correction chain and the selected estimator, and prints touch statistics.
//! Given several files, ranks the touches by faults instead.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use cas_analyser::estimator::EstimatorKind;
use cas_analyser::input::{self, write_cas, InputFormat};
use cas_analyser::report::{RankingReport, StatsReport};
use cas_analyser::summary;
use cas_analyser::Pipeline;
use cas_common::config::{CasConfig, CONFIG_ENV_VAR};
use cas_common::events::{CasEvent, EventBus};
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Event bus capacity; estimate notifications coalesce, so this is ample
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// Decide from the first non-comment line
    Auto,
    Cas,
    Lowndes,
    Bagley,
}

impl FormatArg {
    fn input_format(self) -> Option<InputFormat> {
        match self {
            FormatArg::Auto => None,
            FormatArg::Cas => Some(InputFormat::Cas),
            FormatArg::Lowndes => Some(InputFormat::Lowndes),
            FormatArg::Bagley => Some(InputFormat::Bagley),
        }
    }
}

/// Command-line arguments for cas-analyser
#[derive(Parser, Debug)]
#[command(name = "cas-analyser")]
#[command(about = "Striking analysis for change ringing")]
#[command(version)]
struct Args {
    /// Striking data files; more than one ranks the touches
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Rank the touches by faults even for a single file
    #[arg(long)]
    summary: bool,

    /// Input file format (single-file analysis)
    #[arg(short, long, value_enum, default_value_t = FormatArg::Auto)]
    format: FormatArg,

    /// Estimator used to judge ideal striking (overrides the config file)
    #[arg(short, long, value_enum, env = "CAS_ESTIMATOR")]
    estimator: Option<EstimatorKind>,

    /// Configuration file (default: $CAS_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only count rows judged to be in changes
    #[arg(long)]
    in_changes_only: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Write the accumulated rows to this file in CAS format
    #[arg(long, conflicts_with = "summary")]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = CasConfig::load_resolved(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to load configuration")?;
    if let Some(kind) = args.estimator {
        config.analysis.estimator = kind.to_string();
    }

    // RUST_LOG wins over the configured level
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("cas_analyser={},cas_common={}", level, level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.summary || args.files.len() > 1 {
        if args.export.is_some() {
            bail!("--export needs a single file");
        }
        return rank(args, config).await;
    }
    analyse(args, config).await
}

/// Rank several touches by faults
async fn rank(args: Args, config: CasConfig) -> Result<()> {
    info!("Ranking {} touches", args.files.len());
    let in_changes_only = args.in_changes_only;
    let files = args.files.clone();
    let summary = tokio::task::spawn_blocking(move || {
        summary::summarise_files(&files, &config, in_changes_only)
    })
    .await
    .context("Ranking task failed")??;

    let report = RankingReport::new(&summary);
    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

/// Full statistics for one touch
async fn analyse(args: Args, config: CasConfig) -> Result<()> {
    let file = &args.files[0];
    info!("Analysing {}", file.display());

    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let format = match args.format.input_format() {
        Some(format) => format,
        None => input::detect_format(&content)
            .with_context(|| format!("Can't read {}", file.display()))?,
    };

    let events = EventBus::new(EVENT_CAPACITY);
    let mut rx = events.subscribe();
    let pipeline = Pipeline::new(config, events).context("Failed to start analysis")?;
    let estimator = pipeline.current_estimator();
    let options = pipeline.read_options();
    let mut pipeline_input = pipeline.input(format, &file.display().to_string())?;

    let reader = tokio::task::spawn_blocking(move || {
        input::read_into_with(format, content.as_bytes(), &options, &mut pipeline_input)
    });

    // Wait for the estimator to finish with the last row
    loop {
        match rx.recv().await {
            Ok(CasEvent::AnalysisComplete {
                pipeline_id,
                n_rows,
                ..
            }) if pipeline_id == pipeline.id() => {
                debug!("Analysis complete: {} rows", n_rows);
                break;
            }
            Ok(CasEvent::InputFailed { error, .. }) => {
                error!("Input stopped early: {}", error);
            }
            Ok(event) => debug!("{}", event.event_type()),
            Err(RecvError::Lagged(skipped)) => debug!("Skipped {} progress events", skipped),
            Err(RecvError::Closed) => break,
        }
    }

    let read_result = reader.await.context("Input task failed")?;
    pipeline.wait_idle();

    let stats = pipeline.snapshot();
    let report = StatsReport::new(&stats, estimator.as_str(), args.in_changes_only);
    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }

    if let Some(path) = &args.export {
        let out = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_cas(&pipeline.rows(), BufWriter::new(out))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Exported {} rows to {}", pipeline.n_rows(), path.display());
    }

    pipeline.stop();

    read_result
        .map(|n| debug!("{} strikes read", n))
        .map_err(|e| anyhow!("{}: {}", file.display(), e))
}
