use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use ko_events::settings::{Logging, Settings};
use log::{error, info};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding `settings.toml` and `log.toml`
    #[arg(short, long, value_name = "DIR", default_value = "config")]
    config: PathBuf,

    /// Scrape and render the message, but don't post it
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Keep running and repeat on the cron schedule from the settings
    #[arg(short, long)]
    watch: bool,

    /// Terminal logging verbosity (off, error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL")]
    verbosity: Option<LevelFilter>,
}

#[tokio::main]
async fn main() {
    // Loading .env file
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = run(&args).await {
        if log::log_enabled!(log::Level::Error) {
            error!("{:?}", e);
        } else {
            eprintln!("Error: {:?}", e);
        }
        process::exit(1);
    }
}

async fn run(args: &Args) -> Result<()> {
    let settings = Settings::new(&args.config).await?;
    init_logger(&settings.logging, args.verbosity)?;

    info!("Starting ...");
    if args.watch {
        watch(&settings, args.dry_run).await
    } else {
        ko_events::run_once(&settings, args.dry_run).await
    }
}

/// Set up a combined logger which will log to the terminal and optionally a file. Only this
/// crate's records pass, the browser driver is very chatty on debug level.
fn init_logger(logging: &Logging, verbosity: Option<LevelFilter>) -> Result<()> {
    let config = ConfigBuilder::new()
        .add_filter_allow_str(env!("CARGO_CRATE_NAME"))
        .build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if let Some(filter) = verbosity.or_else(|| logging.terminal.as_ref().map(|t| t.filter)) {
        loggers.push(TermLogger::new(
            filter,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    if let Some(file) = &logging.file {
        loggers.push(WriteLogger::new(
            file.base.filter,
            config,
            create_log_file(&file.path)?,
        ));
    }

    CombinedLogger::init(loggers).context("logger failed to set up")
}

fn create_log_file(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("failed creating log file '{}'", path.display()))
}

/// Run right away, then again whenever the cron schedule fires, until CTRL+C.
async fn watch(settings: &Settings, dry_run: bool) -> Result<()> {
    let expr = settings
        .schedule
        .cron
        .as_deref()
        .context("watch mode needs `cron` in the [schedule] settings")?;
    let schedule = cron::Schedule::from_str(expr)
        .with_context(|| format!("invalid cron expression '{}'", expr))?;

    loop {
        if let Err(e) = ko_events::run_once(settings, dry_run).await {
            error!("Run failed: {:?}", e);
        }

        let next = schedule
            .upcoming(Utc)
            .next()
            .context("cron schedule has no upcoming runs")?;
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        info!(
            "Next run at {} (in {})",
            next,
            humantime::format_duration(Duration::from_secs(wait.as_secs()))
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
