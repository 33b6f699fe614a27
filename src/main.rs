use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use listing_watcher::browser::ChromeDriver;
use listing_watcher::config::{LoggingConfig, ScraperConfig};
use listing_watcher::dispatcher::Dispatcher;
use listing_watcher::notifiers::TelegramMessenger;
use listing_watcher::pipeline::Pipeline;
use listing_watcher::storage::{self, SqliteLedger};
use listing_watcher::AppConfig;

#[derive(Parser)]
#[command(name = "listing-watcher", version, about = "Watches classified-ad searches and announces new listings")]
struct Cli {
    /// Directory holding default.toml and friends
    #[arg(long, global = true, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture, parse, load and notify
    Run {
        target: Option<String>,
        /// Every configured target, one after another
        #[arg(long, conflicts_with = "target")]
        all: bool,
    },
    /// Save page snapshots into a new run directory
    Capture { target: String },
    /// Extract listings from a run's snapshots
    Parse {
        #[arg(long)]
        run: Option<String>,
        target: String,
    },
    /// Upsert a run's listings into the database
    Load {
        #[arg(long)]
        run: Option<String>,
        target: String,
    },
    /// Announce a run's listings that were not announced before
    Notify {
        #[arg(long)]
        run: Option<String>,
        target: String,
    },
    /// List configured targets
    Targets,
}

fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn chrome_launcher(config: &ScraperConfig) -> impl FnOnce() -> listing_watcher::Result<ChromeDriver> + Send + 'static {
    let config = config.clone();
    move || ChromeDriver::launch(&config)
}

async fn build_dispatcher(config: &AppConfig, pool: &sqlx::SqlitePool) -> Result<Dispatcher> {
    let messenger = TelegramMessenger::new(&config.telegram).context("Telegram is not configured")?;
    let ledger = SqliteLedger::open(pool.clone()).await?;
    Ok(Dispatcher::new(Arc::new(messenger), Arc::new(ledger), &config.telegram))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::from_dir(&cli.config_dir)
        .with_context(|| format!("Failed to load configuration from {}", cli.config_dir))?;
    let _guard = init_tracing(&config.logging);

    let pipeline = Pipeline::new(config.clone())?;

    match cli.command {
        Command::Targets => {
            for (key, url) in &config.targets {
                println!("{}\t{}", key, url);
            }
        }
        Command::Run { target, all } => {
            let targets: Vec<String> = match (target, all) {
                (_, true) => config.targets.keys().cloned().collect(),
                (Some(target), false) => vec![target],
                (None, false) => bail!("Specify a target or --all"),
            };

            let pool = storage::connect(&config.storage).await?;
            let dispatcher = build_dispatcher(&config, &pool).await?;

            let mut failed = Vec::new();
            for target in &targets {
                info!("Running session for {}", target);
                match pipeline
                    .run(target, chrome_launcher(&config.scraper), &pool, &dispatcher)
                    .await
                {
                    Ok(report) => info!("{}: {:?}", target, report),
                    Err(e) => {
                        error!("Session for {} failed: {}", target, e);
                        failed.push(target.clone());
                    }
                }
            }

            if !failed.is_empty() {
                bail!("Sessions failed for: {}", failed.join(", "));
            }
        }
        Command::Capture { target } => {
            let (run, report, kept) = pipeline
                .capture(&target, chrome_launcher(&config.scraper))
                .await?;
            info!("Capture finished: {:?}", report);

            if kept {
                println!("{}", run.name());
            } else {
                bail!("Nothing was captured for {}", target);
            }
        }
        Command::Parse { run, target } => {
            let run = pipeline.resolve_run(&target, run.as_deref())?;
            let report = pipeline.parse_run(&run)?;
            info!("Parse finished for {}: {:?}", run.name(), report);
        }
        Command::Load { run, target } => {
            let run = pipeline.resolve_run(&target, run.as_deref())?;
            let pool = storage::connect(&config.storage).await?;
            let report = pipeline.load_run(&run, &target, &pool).await?;
            info!("Load finished for {}: {:?}", run.name(), report);
        }
        Command::Notify { run, target } => {
            let run = pipeline.resolve_run(&target, run.as_deref())?;
            let pool = storage::connect(&config.storage).await?;
            let dispatcher = build_dispatcher(&config, &pool).await?;
            let report = pipeline.notify_run(&run, &dispatcher).await?;
            info!("Notify finished for {}: {:?}", run.name(), report);
        }
    }

    Ok(())
}
