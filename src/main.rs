//! # groupwatch
//!
//! An incremental keyword crawler for social-feed groups. Each run scans the
//! configured groups' chronological feeds through a browserless rendering
//! backend, stops at the frontier marker left by the previous run, merges
//! keyword-matched posts into an append-only result store, and notifies the
//! configured channels about anything new.
//!
//! ## Features
//!
//! - Incremental scans: a per-group frontier marker bounds each pass, with a
//!   staleness window bounding the cold-start backfill
//! - Case-insensitive substring keyword matching over post text
//! - Deduplicated append-only result store keyed by canonical post URL
//! - Concurrent batched scanning with per-group retry and cooldown
//! - Telegram and webhook notifications for newly found posts
//!
//! ## Usage
//!
//! ```sh
//! groupwatch -c config.json -d ./data
//! ```
//!
//! ## Architecture
//!
//! One run is one crawl cycle:
//! 1. **Load**: config, session cookies, and the three snapshot files
//! 2. **Schedule**: partition groups by cooldown, scan the due ones in
//!    concurrent batches with per-group retry
//! 3. **Persist**: write the result, progress, and frontier snapshots back
//! 4. **Report**: notify channels about new posts and log run statistics

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod driver;
mod keywords;
mod models;
mod notify;
mod post_id;
mod retry;
mod scan;
mod scheduler;
mod stats;
mod store;

use cli::Cli;
use config::Config;
use driver::browserless::BrowserlessDriver;
use driver::cookies::load_cookie_file;
use keywords::KeywordMatcher;
use notify::Notifier;
use scheduler::{CrawlScheduler, SchedulerSettings};
use stats::RunStats;
use store::frontier::FrontierIndex;
use store::progress::ProgressCache;
use store::results::ResultStore;

const RESULTS_FILE: &str = "results.json";
const PROGRESS_FILE: &str = "scan_progress.json";
const FRONTIER_FILE: &str = "cacheIndexpost.json";

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("groupwatch starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.data_dir, "Parsed CLI arguments");

    // --- Config ---
    let Some(mut config) = Config::load_or_init(Path::new(&args.config)).await? else {
        error!(path = %args.config, "Edit the generated config file and run again");
        return Err("config file was missing; template written".into());
    };
    if let Some(token) = args.browserless_token {
        config.browserless.token = token;
    }

    // --- Session cookies ---
    let data_dir = Path::new(&args.data_dir);
    let cookie_path = data_dir.join(&config.browserless.cookie_file);
    let cookies = load_cookie_file(&cookie_path).await?;
    if cookies.is_empty() {
        error!(
            path = %cookie_path.display(),
            "No session cookies; export them with Cookie-Editor into the cookie file"
        );
        return Err("cookie file has no cookies".into());
    }
    info!(cookies = cookies.len(), "Session cookies loaded");

    // --- Snapshots ---
    let results_path = data_dir.join(RESULTS_FILE);
    let progress_path = data_dir.join(PROGRESS_FILE);
    let frontier_path = data_dir.join(FRONTIER_FILE);
    let results = ResultStore::load(&results_path).await;
    let progress = ProgressCache::load(&progress_path).await;
    let frontier = FrontierIndex::load(&frontier_path).await;
    info!(known_posts = results.len(), "Snapshots loaded");

    // --- Scheduler ---
    let keywords = KeywordMatcher::new(&config.keywords);
    info!(keywords = keywords.len(), groups = config.group_ids.len(), "Crawl configured");
    debug!(keywords = ?keywords.configured(), "Active keywords");

    let settings = SchedulerSettings {
        max_concurrent: config.performance.max_concurrent_tabs,
        cooldown_minutes: config.performance.group_cooldown_minutes,
        max_retries: config.performance.max_retries,
        retry_delay: Duration::from_secs(5),
        batch_delay: Duration::from_millis(config.performance.batch_delay_ms),
    };
    let scheduler = CrawlScheduler::new(
        settings,
        keywords,
        config.scroll_policy(),
        results,
        frontier,
        progress,
    );

    let base_url = config.browserless.base_url.clone();
    let token = (!config.browserless.token.is_empty()).then(|| config.browserless.token.clone());
    let report = scheduler
        .run(&config.group_ids, || {
            BrowserlessDriver::new(&base_url, token.as_deref(), cookies.clone())
        })
        .await;

    // --- Persist snapshots ---
    // Save even after a fruitless cycle so lastUpdate reflects this run.
    // Clones are taken under the lock; the writes happen outside it.
    let results_snapshot = scheduler.results.lock().unwrap().clone();
    let progress_snapshot = scheduler.progress.lock().unwrap().clone();
    let frontier_snapshot = scheduler.frontier.lock().unwrap().clone();
    results_snapshot.save(&results_path).await?;
    progress_snapshot.save(&progress_path).await?;
    frontier_snapshot.save(&frontier_path).await?;
    info!("Snapshots written");

    // --- Notify & report ---
    let notifier = Notifier::new(config.notification.clone());
    notifier.send_new_posts(&report.new_posts).await;

    for (group_id, remaining) in &report.skipped {
        debug!(%group_id, remaining_minutes = remaining, "Skipped this cycle");
    }
    if report.scanned() == 0 && report.skipped.is_empty() {
        warn!("No groups were scanned or skipped; check the group list");
    }

    RunStats::collect(&scheduler.results.lock().unwrap(), Utc::now()).log();

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        scanned = report.scanned(),
        new = report.new_posts.len(),
        updated = report.updated_posts.len(),
        "Execution complete"
    );

    Ok(())
}
