use std::sync::Arc;
use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use report_triage::{
    config::load_config,
    core::{error::TriageError, report::Report, store::ReportStore},
    oracle::{imaging::HttpImageOracle, scorer::HttpScoreOracle},
    pipeline::validator::ReportValidator,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "report-triage",
    about = "Validate citizen incident reports with AI scoring and bounded retries"
)]
struct Cli {
    /// Path to config file (TOML). Default: config/triage.toml
    #[arg(long)]
    config: Option<String>,
    /// SQLite path for report documents and the attempt ledger
    #[arg(long, default_value = "data/triage.db")]
    db_path: String,
    /// Increase verbosity (info, debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Optional log file path
    #[arg(long, default_value = "data/triage.log")]
    log_file: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one validation call for a report submission (JSON file)
    Validate {
        /// Path to the report JSON
        report: PathBuf,
    },
    /// Print aggregate counts by status and the acceptance rate
    Stats,
    /// Probe the scoring oracle, the image oracle, and the store
    Health,
    /// Delete settled reports older than the cutoff
    Purge {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli)?;

    let cfg = load_config(cli.config.as_deref())?;
    let store = Arc::new(ReportStore::new(Path::new(&cli.db_path))?);
    let scorer = Arc::new(HttpScoreOracle::new(&cfg.scoring)?);
    let imaging = Arc::new(HttpImageOracle::new(&cfg.imaging)?);
    let validator = ReportValidator::new(store.clone(), scorer, imaging, cfg);

    match cli.command {
        Command::Validate { report } => {
            let content = fs::read_to_string(&report)?;
            let report: Report = serde_json::from_str(&content)
                .map_err(|e| TriageError::Shape(format!("report JSON: {e}")))?;
            let outcome = validator.validate(report).await;
            print_json(&outcome)?;
        }
        Command::Stats => {
            let stats = store.stats()?;
            print_json(&stats)?;
        }
        Command::Health => {
            let status = validator.health().await;
            print_json(&status)?;
        }
        Command::Purge { days } => {
            let deleted = store.purge_older_than(days)?;
            tracing::info!("purged {deleted} settled reports older than {days} days");
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), TriageError> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| TriageError::Config(e.to_string()))?;
    println!("{json}");
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<(), TriageError> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = Path::new(&cli.log_file);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).map_err(|e| TriageError::Config(e.to_string()))?;
    }
    if log_path.exists() {
        if let Ok(meta) = fs::metadata(log_path) {
            if meta.len() > 1_000_000 {
                let rotated = log_path.with_extension("log.1");
                let _ = fs::rename(log_path, rotated);
            }
        }
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| TriageError::Config(e.to_string()))?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(false);

    let stdout_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| TriageError::Config(e.to_string()))
}
