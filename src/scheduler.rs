//! Cross-group crawl scheduling.
//!
//! One [`CrawlScheduler::run`] call is one crawl cycle: partition the
//! configured groups into due and cooling-down, then scan the due ones in
//! fixed-size concurrent batches. Lanes within a batch run concurrently and
//! fail independently; batches run strictly in sequence with a pause between
//! them so the rendering backend never sees more than one batch of sessions
//! at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument};

use crate::driver::PageDriver;
use crate::keywords::KeywordMatcher;
use crate::models::{PostRecord, ScrollPolicy, StopReason};
use crate::retry::scan_with_retry;
use crate::scan::ScanContext;
use crate::store::frontier::FrontierIndex;
use crate::store::progress::ProgressCache;
use crate::store::results::ResultStore;

/// Tuning knobs for one crawl cycle.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Lanes per batch.
    pub max_concurrent: usize,
    /// Minimum minutes between successive scans of the same group.
    pub cooldown_minutes: u32,
    /// Restarts allowed per group before giving up on it this cycle.
    pub max_retries: u32,
    /// Pause between restart attempts.
    pub retry_delay: Duration,
    /// Pause between batches.
    pub batch_delay: Duration,
}

/// What a crawl cycle produced, for reporting and notification.
#[derive(Debug, Default)]
pub struct RunReport {
    pub new_posts: Vec<PostRecord>,
    pub updated_posts: Vec<PostRecord>,
    /// Groups skipped this cycle with minutes of cooldown remaining.
    pub skipped: Vec<(String, u32)>,
    pub outcomes: Vec<(String, StopReason)>,
}

impl RunReport {
    pub fn scanned(&self) -> usize {
        self.outcomes.len()
    }
}

/// Drives crawl cycles over the shared stores.
pub struct CrawlScheduler {
    settings: SchedulerSettings,
    keywords: KeywordMatcher,
    base_policy: ScrollPolicy,
    pub results: Arc<Mutex<ResultStore>>,
    pub frontier: Arc<Mutex<FrontierIndex>>,
    pub progress: Arc<Mutex<ProgressCache>>,
}

impl CrawlScheduler {
    pub fn new(
        settings: SchedulerSettings,
        keywords: KeywordMatcher,
        base_policy: ScrollPolicy,
        results: ResultStore,
        frontier: FrontierIndex,
        progress: ProgressCache,
    ) -> Self {
        Self {
            settings,
            keywords,
            base_policy,
            results: Arc::new(Mutex::new(results)),
            frontier: Arc::new(Mutex::new(frontier)),
            progress: Arc::new(Mutex::new(progress)),
        }
    }

    /// Run one crawl cycle over `groups`.
    ///
    /// The factory is called once per scan attempt so every lane (and every
    /// retry) gets its own driver session.
    #[instrument(level = "info", skip_all, fields(groups = groups.len()))]
    pub async fn run<D, F>(&self, groups: &[String], make_driver: F) -> RunReport
    where
        D: PageDriver,
        F: Fn() -> D,
    {
        let mut report = RunReport::default();

        let now = Utc::now();
        let mut eligible: Vec<&String> = Vec::new();
        {
            let progress = self.progress.lock().unwrap();
            for group_id in groups {
                match progress.should_skip(group_id, self.settings.cooldown_minutes, now) {
                    Some(remaining) => {
                        debug!(%group_id, remaining_minutes = remaining, "Cooling down, skipped");
                        report.skipped.push((group_id.clone(), remaining));
                    }
                    None => eligible.push(group_id),
                }
            }
        }

        if eligible.is_empty() {
            info!(skipped = report.skipped.len(), "All groups cooling down, nothing to scan");
            return report;
        }

        info!(
            eligible = eligible.len(),
            skipped = report.skipped.len(),
            batch_size = self.settings.max_concurrent,
            "Starting crawl cycle"
        );

        let ctx = ScanContext {
            keywords: &self.keywords,
            base_policy: self.base_policy,
            results: &self.results,
            frontier: &self.frontier,
            progress: &self.progress,
        };

        let batch_size = self.settings.max_concurrent.max(1);
        for (batch_index, batch) in eligible.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            debug!(batch_index, lanes = batch.len(), "Scanning batch");

            let lanes = batch.iter().map(|group_id| {
                let ctx = &ctx;
                let make_driver = &make_driver;
                async move {
                    let outcome = scan_with_retry(
                        make_driver,
                        group_id,
                        ctx,
                        self.settings.max_retries,
                        self.settings.retry_delay,
                    )
                    .await;
                    (group_id.as_str(), outcome)
                }
            });

            for (group_id, outcome) in join_all(lanes).await {
                report.new_posts.extend(outcome.new_posts);
                report.updated_posts.extend(outcome.updated_posts);
                report.outcomes.push((group_id.to_string(), outcome.stop));
            }
        }

        info!(
            scanned = report.scanned(),
            new = report.new_posts.len(),
            updated = report.updated_posts.len(),
            "Crawl cycle complete"
        );
        report
    }
}
