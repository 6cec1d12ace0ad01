//! Per-group scan statistics, cooldown, and adaptive scroll policy.
//!
//! A [`GroupStat`] entry is created lazily on a group's first scan attempt
//! and updated after every attempt, success or exhausted failure. The cache
//! answers two pure questions for the scheduler and controller:
//!
//! - [`ProgressCache::should_skip`]: is the group still inside its cooldown
//!   window, and if so for how many more minutes?
//! - [`ProgressCache::scroll_policy_for`]: given the base scroll policy,
//!   should this pass scan more cheaply because the previous pass yielded
//!   nothing?
//!
//! Field precedence on update is fixed by [`merge_group_stat`].

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::ScrollPolicy;

/// Scan statistics for one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStat {
    /// Start of the most recent scan attempt, success or failure.
    pub last_scan: Option<DateTime<Utc>>,
    /// Number of new records the last successful pass produced.
    pub last_new_post_count: usize,
    /// Total scan attempts across all runs.
    pub total_scans: u32,
    /// Consecutive(ish) failure counter; reset to zero by any success.
    pub error_count: u32,
}

/// What a finished scan attempt reports back into the cache.
#[derive(Debug, Clone, Copy)]
enum StatUpdate {
    /// Pass completed; carries the new-record count.
    Success { new_posts: usize },
    /// All retries failed; the error counter grows.
    Failure,
}

/// Produce the next [`GroupStat`] for a group after a scan attempt.
///
/// Precedence: `last_scan` is always set to `now` and `total_scans` always
/// grows by one, for failures too, so cooldown applies to failing groups and
/// prevents retry storms across runs. A success overwrites
/// `last_new_post_count` and clears `error_count`; a failure increments
/// `error_count` and leaves `last_new_post_count` untouched.
fn merge_group_stat(existing: Option<&GroupStat>, update: StatUpdate, now: DateTime<Utc>) -> GroupStat {
    let base = existing.cloned().unwrap_or_default();
    let (last_new_post_count, error_count) = match update {
        StatUpdate::Success { new_posts } => (new_posts, 0),
        StatUpdate::Failure => (base.last_new_post_count, base.error_count + 1),
    };
    GroupStat {
        last_scan: Some(now),
        last_new_post_count,
        total_scans: base.total_scans + 1,
        error_count,
    }
}

/// Snapshot envelope: `{ "lastUpdate": …, "groupStats": { groupId: stat } }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressSnapshot {
    last_update: String,
    group_stats: HashMap<String, GroupStat>,
}

/// In-memory cache of per-group scan statistics.
#[derive(Debug, Clone, Default)]
pub struct ProgressCache {
    stats: HashMap<String, GroupStat>,
}

impl ProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_id: &str) -> Option<&GroupStat> {
        self.stats.get(group_id)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Cooldown check: `Some(remaining_minutes)` when the group was scanned
    /// less than `cooldown_minutes` ago, `None` when it is due.
    ///
    /// A group with no prior scan is never skipped. Remaining time is
    /// reported as `ceil(cooldown - elapsed)` minutes, so even one second
    /// short of the window reports at least one minute left.
    pub fn should_skip(
        &self,
        group_id: &str,
        cooldown_minutes: u32,
        now: DateTime<Utc>,
    ) -> Option<u32> {
        let last_scan = self.stats.get(group_id)?.last_scan?;
        let elapsed_minutes = (now - last_scan).num_seconds() as f64 / 60.0;
        let cooldown = cooldown_minutes as f64;
        if elapsed_minutes < cooldown {
            Some((cooldown - elapsed_minutes).ceil() as u32)
        } else {
            None
        }
    }

    /// Derive the scroll policy for this pass.
    ///
    /// Groups whose previous pass produced zero new records get
    /// `max_no_new_posts` reduced by one (floor 1): historically
    /// unproductive groups are scanned more cheaply, not skipped outright —
    /// cooldown handles skipping.
    pub fn scroll_policy_for(&self, group_id: &str, base: ScrollPolicy) -> ScrollPolicy {
        match self.stats.get(group_id) {
            Some(stat) if stat.total_scans > 0 && stat.last_new_post_count == 0 => ScrollPolicy {
                max_no_new_posts: base.max_no_new_posts.saturating_sub(1).max(1),
                ..base
            },
            _ => base,
        }
    }

    /// Record a completed pass (including an access-denied empty pass).
    pub fn record_success(&mut self, group_id: &str, new_posts: usize, now: DateTime<Utc>) {
        let next = merge_group_stat(
            self.stats.get(group_id),
            StatUpdate::Success { new_posts },
            now,
        );
        self.stats.insert(group_id.to_string(), next);
    }

    /// Record a retry-exhausted failure.
    pub fn record_failure(&mut self, group_id: &str, now: DateTime<Utc>) {
        let next = merge_group_stat(self.stats.get(group_id), StatUpdate::Failure, now);
        self.stats.insert(group_id.to_string(), next);
    }

    /// Load a snapshot, degrading to an empty cache on any failure.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<ProgressSnapshot>(&raw) {
                Ok(snapshot) => {
                    info!(count = snapshot.group_stats.len(), path = %path.display(), "Loaded progress cache");
                    Self { stats: snapshot.group_stats }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Progress snapshot unreadable; starting empty");
                    Self::new()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No progress snapshot; starting empty");
                Self::new()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let snapshot = ProgressSnapshot {
            last_update: Utc::now().to_rfc3339(),
            group_stats: self.stats.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        info!(count = self.stats.len(), path = %path.display(), "Saved progress cache");
        Ok(())
    }
}
