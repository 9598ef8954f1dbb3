//! vacancy-worker: polls a job board and notifies subscribers about new
//! vacancies.
//!
//! Subcommands:
//! - `run`: cycle on the configured cron schedule until Ctrl+C
//! - `once`: a single cycle
//! - `dump`: print the full listing table as JSON
//! - `count`: print the number of stored listings
//! - `quarantine`: move a corrupt listing table (or pending file) aside
//! - `subscribe` / `unsubscribe` / `subscribers`: manage chat subscriptions

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use vacancy_core::config::{load_dotenv, Config};
use vacancy_ingest::{HhApiSource, Normalizer};
use vacancy_notify::{
    Dispatcher, JsonFileSubscribers, ListingRenderer, SubscriberRepository, Subscription, TelegramNotifier,
};
use vacancy_store::DedupStore;
use vacancy_watch::{parse_cron, run_scheduled, Pipeline};

// ── CLI ─────────────────────────────────────────────────────────────

/// Vacancy watcher: deduplicates scraped listings and notifies subscribers.
#[derive(Parser, Debug)]
#[command(name = "vacancy-worker", version, about)]
struct Cli {
    /// Config profile; every key is looked up as `{PROFILE}_{KEY}` first.
    #[arg(long, env = "VACANCY_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run cycles on the configured cron schedule.
    Run,
    /// Run a single cycle and exit.
    Once,
    /// Print the full listing table as JSON.
    Dump,
    /// Print the number of stored listings.
    Count,
    /// Move the listing table aside so the next start begins empty.
    Quarantine {
        /// Move the pending delta file aside instead.
        #[arg(long)]
        pending: bool,
    },
    /// Subscribe a chat, optionally only to titles containing a keyword.
    #[command(allow_negative_numbers = true)]
    Subscribe {
        chat_id: i64,
        keywords: Vec<String>,
    },
    /// Remove a chat subscription.
    #[command(allow_negative_numbers = true)]
    Unsubscribe { chat_id: i64 },
    /// List chat subscriptions.
    Subscribers,
}

// ── Wiring ──────────────────────────────────────────────────────────

fn build_dispatcher(config: &Config) -> Result<Option<Dispatcher>> {
    let Some(token) = config.telegram.bot_token.clone() else {
        warn!("TELEGRAM_BOT_TOKEN not set; new listings stay in the pending file");
        return Ok(None);
    };

    let notifier = TelegramNotifier::from_config(token, config.telegram.parse_mode.clone())
        .context("invalid Telegram configuration")?;
    let renderer = match &config.telegram.template {
        Some(template) => ListingRenderer::new(template.clone()).context("invalid TELEGRAM_TEMPLATE")?,
        None => ListingRenderer::default(),
    };
    let subscribers = JsonFileSubscribers::open(config.storage.subscribers_path())
        .context("failed to load subscribers")?;

    Ok(Some(
        Dispatcher::new(Box::new(notifier), Arc::new(subscribers), renderer)
            .with_send_delay(Duration::from_millis(config.schedule.send_delay_ms)),
    ))
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let store = DedupStore::open(&config.storage).context("failed to open listing table")?;
    let source = HhApiSource::new(config.source.clone()).context("failed to build hh.ru client")?;
    let normalizer = Normalizer::new(config.normalize.clone());

    Ok(Pipeline::new(Box::new(source), normalizer, Arc::new(store), build_dispatcher(config)?)
        .with_process_timeout(Duration::from_secs(config.schedule.process_timeout_secs)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; running until killed");
        std::future::pending::<()>().await;
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = match &cli.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.validate()?;

    match cli.command {
        Command::Run => {
            config.log_summary();
            let schedule = parse_cron(&config.schedule.cron)
                .with_context(|| format!("invalid POLL_CRON '{}'", config.schedule.cron))?;
            let pipeline = build_pipeline(&config)?;
            let retry_delay = Duration::from_secs(config.schedule.retry_delay_secs);

            info!(cron = %config.schedule.cron, "vacancy-worker starting");
            run_scheduled(&pipeline, &schedule, retry_delay, shutdown_signal()).await;
            info!("vacancy-worker exited cleanly");
        }
        Command::Once => {
            config.log_summary();
            let pipeline = build_pipeline(&config)?;
            let report = pipeline.run_cycle().await?;
            println!(
                "fetched={} skipped={} new={} delivered={} failed={}",
                report.fetched, report.skipped, report.new, report.delivered, report.failed
            );
        }
        Command::Dump => {
            let table = DedupStore::read_snapshot(&config.storage)?;
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        Command::Count => {
            println!("{}", DedupStore::read_snapshot(&config.storage)?.len());
        }
        Command::Quarantine { pending: false } => match DedupStore::quarantine(&config.storage)? {
            Some(path) => println!("listing table moved to {}", path.display()),
            None => println!("no listing table at {}", config.storage.table_path().display()),
        },
        Command::Quarantine { pending: true } => match DedupStore::quarantine_pending(&config.storage)? {
            Some(path) => println!("pending file moved to {}", path.display()),
            None => println!("no pending file at {}", config.storage.pending_path().display()),
        },
        Command::Subscribe { chat_id, keywords } => {
            let repo = JsonFileSubscribers::open(config.storage.subscribers_path())?;
            let is_new = repo.subscribe(Subscription::new(chat_id).with_keywords(keywords)).await?;
            println!("{} {chat_id}", if is_new { "subscribed" } else { "updated" });
        }
        Command::Unsubscribe { chat_id } => {
            let repo = JsonFileSubscribers::open(config.storage.subscribers_path())?;
            if repo.unsubscribe(chat_id).await? {
                println!("unsubscribed {chat_id}");
            } else {
                println!("{chat_id} was not subscribed");
            }
        }
        Command::Subscribers => {
            let repo = JsonFileSubscribers::open(config.storage.subscribers_path())?;
            for sub in repo.list().await? {
                println!("{}\t{}", sub.chat_id, sub.keywords.join(","));
            }
        }
    }

    Ok(())
}
