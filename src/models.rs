//! Core data models for scanned posts and scan outcomes.
//!
//! This module defines the data structures shared across the scan engine:
//! - [`PostRecord`]: A deduplicated, persisted record keyed by post URL
//! - [`PostCandidate`]: A keyword-matched observation about to be merged
//! - [`RawPostObservation`]: An ephemeral per-scroll extraction from the page driver
//! - [`ScrollPolicy`]: Per-pass scroll/stop thresholds
//! - [`StopReason`] / [`ScanOutcome`]: How and with what a scan pass finished
//!
//! Persisted records use camelCase field names so the snapshot files stay
//! byte-compatible with earlier iterations of this tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters kept in a record's text preview.
pub const PREVIEW_MAX_CHARS: usize = 300;

/// A deduplicated post record with lifecycle metadata.
///
/// Identity is the query-stripped `post_url`. `first_seen` is set once when
/// the record is created and never changes afterwards; `scan_count` counts
/// the number of runs in which the post was observed (the controller's
/// per-run processed set guarantees at most one merge per run).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    /// Stable identity: the post's permalink with any query string stripped.
    pub post_url: String,
    /// The group the post was observed in.
    pub group_id: String,
    /// Post identifier derived from the URL (see [`crate::post_id`]).
    pub post_id: String,
    /// Display name of the post's author.
    pub author_name: String,
    /// Numeric profile id of the author, or `"unknown"`.
    pub user_id: String,
    /// Bounded-length, newline-collapsed excerpt of the post text.
    pub text_preview: String,
    /// Configured keywords found in the post text, in configured order.
    pub matched_keywords: Vec<String>,
    /// The post's own publish time, when the page exposed one.
    #[serde(default)]
    pub origin_timestamp: Option<DateTime<Utc>>,
    /// When this record was first created. Immutable.
    pub first_seen: DateTime<Utc>,
    /// When the post was most recently observed.
    pub last_seen: DateTime<Utc>,
    /// When any field of this record last changed.
    pub last_updated: DateTime<Utc>,
    /// Number of runs that observed this post. Always >= 1.
    pub scan_count: u32,
}

/// A keyword-matched observation, ready to be merged into the result store.
///
/// Built by the scan controller from a [`RawPostObservation`] once the post
/// passed keyword matching. Carries everything the store needs to create or
/// refresh a [`PostRecord`].
#[derive(Debug, Clone)]
pub struct PostCandidate {
    pub post_url: String,
    pub group_id: String,
    pub post_id: String,
    pub author_name: String,
    pub user_id: String,
    pub text_preview: String,
    pub matched_keywords: Vec<String>,
    pub origin_timestamp: Option<DateTime<Utc>>,
}

impl PostCandidate {
    /// Build a candidate from a raw observation.
    ///
    /// The preview is capped at [`PREVIEW_MAX_CHARS`] characters with
    /// newlines collapsed to spaces, so a record never drags a whole
    /// multi-paragraph post into the snapshot file.
    pub fn from_observation(
        group_id: &str,
        post_id: String,
        post_url: String,
        observation: &RawPostObservation,
        matched_keywords: Vec<String>,
    ) -> Self {
        Self {
            post_url,
            group_id: group_id.to_string(),
            post_id,
            author_name: observation.author_name.clone(),
            user_id: observation.user_id.clone(),
            text_preview: make_preview(&observation.text),
            matched_keywords,
            origin_timestamp: observation.origin_timestamp,
        }
    }
}

/// Collapse newlines and cap the text at [`PREVIEW_MAX_CHARS`] characters.
pub fn make_preview(text: &str) -> String {
    text.chars()
        .take(PREVIEW_MAX_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// One raw post as extracted from the page during a scroll step.
///
/// Ephemeral: produced by the page driver, consumed immediately by the scan
/// controller's merge step, never persisted.
#[derive(Debug, Clone)]
pub struct RawPostObservation {
    /// Full visible text of the post element.
    pub text: String,
    /// Permalink of the post (query string already stripped by the driver).
    pub post_url: String,
    /// Display name of the author, or `"Unknown"`.
    pub author_name: String,
    /// Numeric profile id of the author, or `"unknown"`.
    pub user_id: String,
    /// The post's own publish time, when one could be extracted.
    pub origin_timestamp: Option<DateTime<Utc>>,
}

/// Scroll/stop thresholds applied to a single scan pass.
///
/// Derived from the base configuration; the progress cache tightens
/// `max_no_new_posts` for groups whose previous scan yielded nothing
/// (see [`crate::store::progress::ProgressCache::scroll_policy_for`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPolicy {
    /// Stop after this many consecutive scrolls without an unprocessed post.
    pub max_no_new_posts: u32,
    /// Lower bound of the jittered inter-scroll sleep, in milliseconds.
    pub scroll_wait_min_ms: u64,
    /// Upper bound of the jittered inter-scroll sleep, in milliseconds.
    pub scroll_wait_max_ms: u64,
}

/// Why a scan pass for a group ended.
///
/// The first five variants are the scroll loop's terminal states and are all
/// successful completions. `AccessDenied` is the early-out for a feed the
/// current session cannot view (also a successful empty pass), and
/// `RetriesExhausted` is the retry supervisor's absorbing state for a group
/// whose attempts all failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The scan caught up to the frontier marker of the previous run.
    KnownPostReached,
    /// Cold start hit a post older than the staleness window.
    StalePostReached,
    /// The driver reported no further scroll progress.
    FeedEnd,
    /// Too many consecutive empty extraction batches.
    ExtractionExhausted,
    /// Too many consecutive scrolls without an unprocessed post.
    NoNewPostsThreshold,
    /// The feed was not viewable for the current session.
    AccessDenied,
    /// Every attempt failed; the failure was absorbed into an empty result.
    RetriesExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::KnownPostReached => "known-post-reached",
            StopReason::StalePostReached => "stale-post-reached",
            StopReason::FeedEnd => "feed-end",
            StopReason::ExtractionExhausted => "extraction-exhausted",
            StopReason::NoNewPostsThreshold => "no-new-posts-threshold",
            StopReason::AccessDenied => "access-denied",
            StopReason::RetriesExhausted => "retries-exhausted",
        };
        f.write_str(s)
    }
}

/// The result of one scan pass over one group.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Records created during this pass.
    pub new_posts: Vec<PostRecord>,
    /// Records refreshed during this pass.
    pub updated_posts: Vec<PostRecord>,
    /// Terminal state of the pass.
    pub stop: StopReason,
    /// Number of scroll steps performed.
    pub scroll_count: u32,
    /// Number of distinct posts processed (keyword match or not).
    pub processed_count: usize,
}

impl ScanOutcome {
    /// An empty outcome with the given terminal state.
    pub fn empty(stop: StopReason) -> Self {
        Self {
            new_posts: Vec::new(),
            updated_posts: Vec::new(),
            stop,
            scroll_count: 0,
            processed_count: 0,
        }
    }
}
