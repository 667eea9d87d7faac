use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use beacon_core::{
    ActorId, EventData, HttpRemoteStore, LocalCache, MemoryRemoteStore, PipelineConfig,
    RemoteStore, TelemetryPipeline, TimeWindow,
    aggregate::{AggregationEngine, AggregationLimits},
    format::{format_envelope, format_envelope_styled, format_report_readable, format_timestamp},
    logging::init_logging,
    types::now_ms,
    workers::{sweep_local, sweep_remote},
};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", secs / 60.0, secs % 60.0)
    }
}

/// CLI wrapper for Level (needed for clap ValueEnum)
#[derive(Clone, Copy, ValueEnum)]
enum CliLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<CliLevel> for beacon_core::Level {
    fn from(cli: CliLevel) -> Self {
        match cli {
            CliLevel::Debug => beacon_core::Level::Debug,
            CliLevel::Info => beacon_core::Level::Info,
            CliLevel::Warn => beacon_core::Level::Warn,
            CliLevel::Error => beacon_core::Level::Error,
        }
    }
}

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Inspect, export, sweep and aggregate client telemetry")]
struct Cli {
    /// Local cache database (defaults to BEACON_CACHE_PATH or the user cache dir)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Remote log store base URL (defaults to BEACON_REMOTE_URL)
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Emit side-channel logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emit one event through the full pipeline and flush it
    Emit {
        #[arg(value_enum)]
        level: CliLevel,
        category: String,
        message: String,
        /// JSON object attached as context
        #[arg(short, long)]
        data: Option<String>,
        /// Actor to attribute the event to; without it nothing is uploaded
        #[arg(short, long)]
        actor: Option<String>,
    },
    /// Show the most recent local records
    Tail {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Export the local cache as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Re-ingest a document produced by `export`
    Import { path: PathBuf },
    /// Purge records older than the retention horizon
    Sweep {
        /// Also sweep this actor's remote partition
        #[arg(short, long)]
        actor: Option<String>,
    },
    /// List one actor's remote records
    Query {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long, default_value = "7d")]
        since: String,
    },
    /// Aggregate the remote corpus into an issue report (privileged)
    Report {
        /// Privileged actor performing the query
        #[arg(long = "as")]
        caller: String,
        #[arg(short, long, default_value = "7d")]
        window: String,
        /// Print the raw JSON document instead of the readable report
        #[arg(long)]
        json: bool,
        /// Also save the JSON document to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.cyan} {msg}")
    {
        pb.set_style(spinner_style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn remote_store(config: &PipelineConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
    let Some(url) = &config.remote_url else {
        return Ok(None);
    };
    let store: Arc<dyn RemoteStore> =
        Arc::new(HttpRemoteStore::new(url, config.remote_token.clone())?);
    Ok(Some(store))
}

fn require_remote(config: &PipelineConfig) -> Result<Arc<dyn RemoteStore>> {
    match remote_store(config)? {
        Some(store) => Ok(store),
        None => bail!("no remote store configured, pass --remote or set BEACON_REMOTE_URL"),
    }
}

fn open_cache(config: &PipelineConfig) -> Result<LocalCache> {
    let path = config.cache_path();
    LocalCache::open(&path).with_context(|| format!("opening {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };
    if cli.cache.is_some() {
        config.cache_path = cli.cache.clone();
    }
    if cli.remote.is_some() {
        config.remote_url = cli.remote.clone();
    }
    init_logging(&config.log_level, cli.json_logs)?;

    match cli.command {
        Command::Emit {
            level,
            category,
            message,
            data,
            actor,
        } => emit(config, level, category, message, data, actor).await,
        Command::Tail { limit } => tail(&config, limit),
        Command::Export { out } => export(&config, out),
        Command::Import { path } => import(&config, &path),
        Command::Sweep { actor } => sweep(&config, actor).await,
        Command::Query { actor, since } => query(&config, actor, &since).await,
        Command::Report {
            caller,
            window,
            json,
            out,
        } => report(&config, caller, &window, json, out).await,
    }
}

async fn emit(
    config: PipelineConfig,
    level: CliLevel,
    category: String,
    message: String,
    data: Option<String>,
    actor: Option<String>,
) -> Result<()> {
    let data: EventData = match data {
        Some(raw) => serde_json::from_str(&raw).context("--data must be a JSON object")?,
        None => EventData::new(),
    };
    let store: Arc<dyn RemoteStore> = match remote_store(&config)? {
        Some(store) => store,
        None => {
            println!(
                "{} No remote store configured, event stays local",
                style("!").yellow().bold()
            );
            Arc::new(MemoryRemoteStore::new())
        }
    };

    let pipeline = TelemetryPipeline::open(config, store);
    if let Some(actor) = actor {
        pipeline.bind(ActorId::new(actor));
    }
    pipeline.emit(level.into(), category, message, data);
    let outcome = pipeline.flush().await?;
    pipeline.stop().await;

    println!(
        "{} Emitted in session {} {}",
        style("✓").green().bold(),
        style(pipeline.session_id()).cyan(),
        style(format!("[{:?}]", outcome)).dim()
    );
    Ok(())
}

fn tail(config: &PipelineConfig, limit: usize) -> Result<()> {
    let cache = open_cache(config)?;
    let mut records = cache.recent(limit)?;
    records.reverse();
    for record in &records {
        println!("{}", format_envelope_styled(&record.envelope));
    }
    println!(
        "\n{} {} of {} records",
        style("Shown:").dim(),
        records.len(),
        cache.count()?
    );
    Ok(())
}

fn export(config: &PipelineConfig, out: Option<PathBuf>) -> Result<()> {
    let cache = open_cache(config)?;
    let document = cache.export_json()?;
    match out {
        Some(path) => {
            std::fs::write(&path, document)?;
            println!(
                "{} Exported {} records to {}",
                style("✓").green().bold(),
                cache.count()?,
                style(path.display()).cyan()
            );
        }
        None => println!("{document}"),
    }
    Ok(())
}

fn import(config: &PipelineConfig, path: &Path) -> Result<()> {
    let cache = open_cache(config)?;
    let document = std::fs::read_to_string(path)?;
    let imported = cache.import_json(&document)?;
    println!(
        "{} Imported {} records",
        style("✓").green().bold(),
        imported
    );
    Ok(())
}

async fn sweep(config: &PipelineConfig, actor: Option<String>) -> Result<()> {
    let cutoff = now_ms() - config.retention_ms();
    println!(
        "{} Retention horizon: {} days (cutoff {})",
        style("•").dim(),
        config.retention_days,
        format_timestamp(cutoff)
    );

    let cache = open_cache(config)?;
    let deleted = sweep_local(&cache, cutoff)?;
    println!(
        "{} Local: {} records deleted",
        style("✓").green().bold(),
        deleted
    );

    if let Some(actor) = actor {
        let store = require_remote(config)?;
        let spinner = create_spinner("Sweeping remote partition...");
        let remote = sweep_remote(store.as_ref(), &ActorId::new(actor), cutoff).await?;
        spinner.finish_with_message(format!(
            "{} Remote: {} of {} sessions deleted ({} records)",
            style("✓").green().bold(),
            remote.sessions_deleted,
            remote.sessions_scanned,
            remote.records_deleted
        ));
    }
    Ok(())
}

async fn query(config: &PipelineConfig, actor: String, since: &str) -> Result<()> {
    let window: TimeWindow = since.parse()?;
    let store = require_remote(config)?;
    let (start, end) = window.bounds(now_ms());

    let step_start = Instant::now();
    let spinner = create_spinner("Fetching remote records...");
    let records = store.query_actor(&ActorId::new(actor), start, end).await?;
    spinner.finish_with_message(format!(
        "{} Fetched {} records {}",
        style("✓").green().bold(),
        records.len(),
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));

    for record in &records {
        println!("{}", format_envelope(&record.envelope));
    }
    Ok(())
}

async fn report(
    config: &PipelineConfig,
    caller: String,
    window: &str,
    json: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let window: TimeWindow = window.parse()?;
    let store = require_remote(config)?;
    let engine = AggregationEngine::new(store, AggregationLimits::from(config));

    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Aggregating last {}...", window));
    let report = engine.query(&ActorId::new(caller), window, now_ms()).await;
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!(
        "{} Aggregated {} records {}",
        style("✓").green().bold(),
        report.total_records,
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));

    let document = report.to_json_pretty()?;
    if let Some(path) = out {
        std::fs::write(&path, &document)?;
        println!("{} {}", style("Saved:").dim(), style(path.display()).cyan());
    }

    println!("{}", style("─".repeat(60)).dim());
    if json {
        println!("{document}");
    } else {
        println!("{}", format_report_readable(&report));
    }
    Ok(())
}
