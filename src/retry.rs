//! Retry supervision for a single group's scan.
//!
//! Driver failures (navigation, transport, protocol) abort the whole pass,
//! so each retry starts from a fresh driver session and re-walks the feed
//! from the top. Partial results from a failed attempt are discarded; the
//! result store only ever sees merges from the attempt that completed.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, warn};

use crate::driver::PageDriver;
use crate::models::{ScanOutcome, StopReason};
use crate::scan::{ScanContext, scan_group};

/// Scan one group, restarting on driver failure up to `max_retries` times.
///
/// The factory supplies a fresh driver for every attempt. When all attempts
/// fail the group's error count is bumped, its cooldown clock still starts,
/// and an empty outcome with [`StopReason::RetriesExhausted`] is returned so
/// the batch can keep aggregating.
pub async fn scan_with_retry<D, F>(
    make_driver: &F,
    group_id: &str,
    ctx: &ScanContext<'_>,
    max_retries: u32,
    retry_delay: Duration,
) -> ScanOutcome
where
    D: PageDriver,
    F: Fn() -> D,
{
    let mut attempt = 0u32;
    loop {
        let mut driver = make_driver();
        match scan_group(&mut driver, group_id, ctx).await {
            Ok(outcome) => return outcome,
            Err(err) => {
                attempt += 1;
                if attempt > max_retries {
                    error!(%group_id, %err, attempts = attempt, "Scan failed, retries exhausted");
                    ctx.progress.lock().unwrap().record_failure(group_id, Utc::now());
                    return ScanOutcome::empty(StopReason::RetriesExhausted);
                }
                warn!(
                    %group_id,
                    %err,
                    attempt,
                    max_retries,
                    "Scan failed, retrying after {:?}",
                    retry_delay
                );
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
