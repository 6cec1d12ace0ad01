//! Group scan controller: the scroll/stop/merge state machine.
//!
//! One call to [`scan_group`] runs a complete scan pass over one group's
//! chronological feed. The pass scroll-paginates the feed through the page
//! driver, derives a post id for every observation, and stops at the first
//! of these terminal states:
//!
//! - `known-post-reached`: the id matches the frontier marker left by the
//!   previous completed scan — the incremental boundary
//! - `stale-post-reached`: cold start (no marker) hit a post older than
//!   [`STALE_POST_DAYS`]
//! - `feed-end`: the driver reports no further scroll progress
//! - `extraction-exhausted`: [`MAX_EMPTY_SCROLLS`] consecutive empty batches
//! - `no-new-posts-threshold`: too many consecutive scrolls where every
//!   observation was pagination overlap
//!
//! All of these are successful completions. Keyword-matched posts are merged
//! into the shared result store as they are found; a per-pass processed-URL
//! set guarantees a post is merged at most once per run even when scroll
//! pagination shows it repeatedly.
//!
//! Between scroll steps the pass sleeps a jittered interval drawn from the
//! scroll policy. The pacing is mandatory: the feeds being scanned defend
//! against automation, and a scan that hammers the page gets the whole
//! session flagged.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use rand::{Rng, rng};
use tracing::{debug, info, instrument, warn};

use crate::driver::{DriverError, PageDriver};
use crate::keywords::KeywordMatcher;
use crate::models::{PostCandidate, ScanOutcome, ScrollPolicy, StopReason};
use crate::post_id::{extract_post_id, strip_query};
use crate::store::frontier::FrontierIndex;
use crate::store::progress::ProgressCache;
use crate::store::results::ResultStore;

/// Cold-start staleness window: posts older than this end the backfill.
pub const STALE_POST_DAYS: i64 = 3;

/// Consecutive empty extraction batches tolerated before giving up.
pub const MAX_EMPTY_SCROLLS: u32 = 5;

/// Everything a scan pass needs besides its driver session.
///
/// The stores are shared with the other lanes of the batch; locks are held
/// only for individual merges and lookups, never across an await point.
pub struct ScanContext<'a> {
    pub keywords: &'a KeywordMatcher,
    pub base_policy: ScrollPolicy,
    pub results: &'a Mutex<ResultStore>,
    pub frontier: &'a Mutex<FrontierIndex>,
    pub progress: &'a Mutex<ProgressCache>,
}

/// Run one scan pass over one group.
///
/// On success the frontier marker is re-pointed at the first post id seen
/// this pass (re-affirmed even when the pass stopped immediately at the
/// known post) and the group's progress entry is updated. A driver failure
/// propagates to the retry supervisor with no post-pass effects applied.
#[instrument(level = "info", skip_all, fields(%group_id))]
pub async fn scan_group<D: PageDriver>(
    driver: &mut D,
    group_id: &str,
    ctx: &ScanContext<'_>,
) -> Result<ScanOutcome, DriverError> {
    let accessible = driver.open(group_id).await?;
    if !accessible {
        // Expected, not exceptional: record the attempt so cooldown applies
        // and report an empty successful pass.
        warn!(%group_id, "Feed not accessible; empty pass");
        ctx.progress.lock().unwrap().record_success(group_id, 0, Utc::now());
        return Ok(ScanOutcome::empty(StopReason::AccessDenied));
    }

    let policy = ctx.progress.lock().unwrap().scroll_policy_for(group_id, ctx.base_policy);
    let prior_marker = ctx.frontier.lock().unwrap().get(group_id);
    let stale_cutoff = Utc::now() - Duration::days(STALE_POST_DAYS);

    debug!(
        %group_id,
        known_marker = prior_marker.as_deref().unwrap_or("none"),
        max_no_new_posts = policy.max_no_new_posts,
        "Starting scroll loop"
    );

    let mut new_posts = Vec::new();
    let mut updated_posts = Vec::new();
    let mut processed_urls: HashSet<String> = HashSet::new();
    let mut first_post_id: Option<String> = None;

    let mut scroll_count = 0u32;
    let mut no_new_posts_count = 0u32;
    let mut consecutive_empty_scrolls = 0u32;

    let stop = loop {
        if no_new_posts_count >= policy.max_no_new_posts {
            break StopReason::NoNewPostsThreshold;
        }

        scroll_count += 1;
        if !driver.scroll_step().await? {
            break StopReason::FeedEnd;
        }

        driver.await_stable().await;
        jittered_sleep(&policy).await;

        let batch = driver.extract_observations().await?;
        if batch.is_empty() {
            consecutive_empty_scrolls += 1;
            debug!(%group_id, scroll_count, consecutive_empty_scrolls, "Empty extraction batch");
            if consecutive_empty_scrolls >= MAX_EMPTY_SCROLLS {
                break StopReason::ExtractionExhausted;
            }
            continue;
        }
        consecutive_empty_scrolls = 0;

        let mut found_unprocessed = false;
        let mut matched_in_batch = 0usize;
        let mut boundary: Option<StopReason> = None;

        for observation in &batch {
            let post_url = strip_query(&observation.post_url).to_string();
            let Some(post_id) = extract_post_id(&post_url) else {
                continue;
            };

            // The first id of the pass is the frontier candidate, whether or
            // not the post matches any keyword: the frontier tracks feed
            // recency, not keyword relevance.
            if first_post_id.is_none() {
                debug!(%group_id, %post_id, "Frontier candidate for this pass");
                first_post_id = Some(post_id.clone());
            }

            if let Some(marker) = &prior_marker {
                if post_id == *marker {
                    boundary = Some(StopReason::KnownPostReached);
                    break;
                }
            } else if let Some(origin) = observation.origin_timestamp {
                if origin < stale_cutoff {
                    boundary = Some(StopReason::StalePostReached);
                    break;
                }
            }

            // Pagination overlap within this pass: skip, not a stop.
            if !processed_urls.insert(post_url.clone()) {
                continue;
            }
            found_unprocessed = true;

            if ctx.keywords.is_match(&observation.text) {
                matched_in_batch += 1;
                let candidate = PostCandidate::from_observation(
                    group_id,
                    post_id,
                    post_url,
                    observation,
                    ctx.keywords.matched_keywords(&observation.text),
                );
                let (is_new, record) = ctx.results.lock().unwrap().merge(candidate, Utc::now());
                if is_new {
                    info!(%group_id, post_id = %record.post_id, author = %record.author_name, "New post");
                    new_posts.push(record);
                } else {
                    debug!(%group_id, post_id = %record.post_id, scan_count = record.scan_count, "Updated post");
                    updated_posts.push(record);
                }
            }
        }

        if let Some(reason) = boundary {
            break reason;
        }

        // Any unprocessed observation keeps the scan alive, keyword match or
        // not; only a batch of pure overlap counts against the threshold.
        if found_unprocessed {
            no_new_posts_count = 0;
            debug!(%group_id, scroll_count, matched_in_batch, batch_size = batch.len(), "Batch processed");
        } else {
            no_new_posts_count += 1;
            debug!(%group_id, scroll_count, no_new_posts_count, "No unprocessed posts in batch");
        }
    };

    // Post-pass effects: re-point the frontier at the first id of the pass
    // (a re-affirmation when nothing moved) and refresh the progress entry.
    if let Some(post_id) = &first_post_id {
        ctx.frontier.lock().unwrap().set(group_id, post_id);
    }
    ctx.progress.lock().unwrap().record_success(group_id, new_posts.len(), Utc::now());

    info!(
        %group_id,
        stop = %stop,
        new = new_posts.len(),
        updated = updated_posts.len(),
        scrolls = scroll_count,
        processed = processed_urls.len(),
        "Scan pass complete"
    );

    Ok(ScanOutcome {
        new_posts,
        updated_posts,
        stop,
        scroll_count,
        processed_count: processed_urls.len(),
    })
}

/// Sleep a uniform random interval from the policy's wait bounds.
async fn jittered_sleep(policy: &ScrollPolicy) {
    let wait_ms = if policy.scroll_wait_max_ms > policy.scroll_wait_min_ms {
        rng().random_range(policy.scroll_wait_min_ms..=policy.scroll_wait_max_ms)
    } else {
        policy.scroll_wait_min_ms
    };
    tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::{GroupScript, ScriptBook, aged_obs, obs, obs_at};
    use crate::models::PostRecord;

    fn fast_policy(max_no_new_posts: u32) -> ScrollPolicy {
        ScrollPolicy { max_no_new_posts, scroll_wait_min_ms: 0, scroll_wait_max_ms: 0 }
    }

    struct Fixture {
        keywords: KeywordMatcher,
        results: Mutex<ResultStore>,
        frontier: Mutex<FrontierIndex>,
        progress: Mutex<ProgressCache>,
    }

    impl Fixture {
        fn new(keywords: &[&str]) -> Self {
            let owned: Vec<String> = keywords.iter().map(|s| s.to_string()).collect();
            Self {
                keywords: KeywordMatcher::new(&owned),
                results: Mutex::new(ResultStore::new()),
                frontier: Mutex::new(FrontierIndex::new()),
                progress: Mutex::new(ProgressCache::new()),
            }
        }

        fn ctx(&self) -> ScanContext<'_> {
            ScanContext {
                keywords: &self.keywords,
                base_policy: fast_policy(3),
                results: &self.results,
                frontier: &self.frontier,
                progress: &self.progress,
            }
        }

        fn record(&self, post_url: &str) -> Option<PostRecord> {
            self.results.lock().unwrap().get(post_url).cloned()
        }
    }

    #[tokio::test]
    async fn cold_start_collects_matching_posts_until_feed_end() {
        let fixture = Fixture::new(&["mua", "bán"]);
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![
                vec![obs("g1", "3", "cần mua gấp"), obs("g1", "2", "chuyện khác")],
                vec![obs("g1", "1", "thanh lý, ai bán không")],
            ]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::FeedEnd);
        assert_eq!(outcome.new_posts.len(), 2);
        assert!(outcome.updated_posts.is_empty());
        assert_eq!(outcome.processed_count, 3);

        // Frontier points at the first id of the pass.
        assert_eq!(fixture.frontier.lock().unwrap().get("g1"), Some("3".to_string()));

        let stat = fixture.progress.lock().unwrap().get("g1").cloned().unwrap();
        assert_eq!(stat.last_new_post_count, 2);
        assert_eq!(stat.error_count, 0);
        assert_eq!(stat.total_scans, 1);
    }

    #[tokio::test]
    async fn stops_at_known_marker_without_remerging_it() {
        let fixture = Fixture::new(&["mua"]);
        // Previous run left marker "10" and a record for post 10.
        fixture.frontier.lock().unwrap().set("g1", "10");
        let before = {
            let mut results = fixture.results.lock().unwrap();
            let candidate = PostCandidate::from_observation(
                "g1",
                "10".to_string(),
                "https://www.facebook.com/groups/g1/posts/10".to_string(),
                &obs("g1", "10", "cần mua cũ"),
                vec!["mua".to_string()],
            );
            results.merge(candidate, Utc::now()).1
        };

        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![vec![
                obs("g1", "12", "cần mua mới"),
                obs("g1", "11", "không liên quan"),
                obs("g1", "10", "cần mua cũ"),
                obs("g1", "9", "cần mua rất cũ"),
            ]]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::KnownPostReached);
        // Only the post above the marker got merged; the marker post itself
        // and everything below stayed untouched.
        assert_eq!(outcome.new_posts.len(), 1);
        assert_eq!(outcome.new_posts[0].post_id, "12");
        let unchanged = fixture.record("https://www.facebook.com/groups/g1/posts/10").unwrap();
        assert_eq!(unchanged.scan_count, before.scan_count);
        assert!(fixture.record("https://www.facebook.com/groups/g1/posts/9").is_none());

        // Marker moves to this pass's newest post.
        assert_eq!(fixture.frontier.lock().unwrap().get("g1"), Some("12".to_string()));
    }

    #[tokio::test]
    async fn known_marker_on_first_observation_reaffirms_frontier() {
        let fixture = Fixture::new(&["mua"]);
        fixture.frontier.lock().unwrap().set("g1", "10");

        let book = ScriptBook::new();
        book.insert("g1", GroupScript::with_batches(vec![vec![obs("g1", "10", "cần mua")]]));

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::KnownPostReached);
        assert!(outcome.new_posts.is_empty());
        assert_eq!(fixture.frontier.lock().unwrap().get("g1"), Some("10".to_string()));
        let stat = fixture.progress.lock().unwrap().get("g1").cloned().unwrap();
        assert_eq!(stat.last_new_post_count, 0);
    }

    #[tokio::test]
    async fn cold_start_stops_at_stale_post() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![
                vec![obs("g1", "5", "cần mua hôm nay")],
                vec![aged_obs("g1", "4", "cần mua từ tuần trước", 4)],
                vec![obs("g1", "3", "không bao giờ thấy")],
            ]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::StalePostReached);
        assert_eq!(outcome.new_posts.len(), 1);
        assert_eq!(outcome.new_posts[0].post_id, "5");
        // The stale post itself is not merged and scrolling stopped there.
        assert!(fixture.record("https://www.facebook.com/groups/g1/posts/4").is_none());
        assert!(fixture.record("https://www.facebook.com/groups/g1/posts/3").is_none());
    }

    #[tokio::test]
    async fn missing_timestamps_never_trigger_the_stale_stop() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![vec![
                obs_at("g1", "2", "cần mua", None),
                obs_at("g1", "1", "cần mua", None),
            ]]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::FeedEnd);
        assert_eq!(outcome.new_posts.len(), 2);
    }

    #[tokio::test]
    async fn known_marker_takes_priority_over_staleness() {
        let fixture = Fixture::new(&["mua"]);
        fixture.frontier.lock().unwrap().set("g1", "2");

        // Old posts above the marker must not trigger the stale stop once a
        // marker exists; the scan runs until it finds the marker.
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![
                vec![aged_obs("g1", "4", "cần mua", 10), aged_obs("g1", "3", "cần mua", 10)],
                vec![aged_obs("g1", "2", "marker", 10)],
            ]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::KnownPostReached);
        assert_eq!(outcome.new_posts.len(), 2);
    }

    #[tokio::test]
    async fn pagination_overlap_does_not_double_count() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        // The same post shows up in three consecutive viewports.
        book.insert(
            "g1",
            GroupScript::with_batches(vec![
                vec![obs("g1", "7", "cần mua")],
                vec![obs("g1", "7", "cần mua"), obs("g1", "6", "cần mua nữa")],
                vec![obs("g1", "7", "cần mua"), obs("g1", "6", "cần mua nữa")],
            ]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.new_posts.len(), 2);
        assert!(outcome.updated_posts.is_empty());
        let record = fixture.record("https://www.facebook.com/groups/g1/posts/7").unwrap();
        assert_eq!(record.scan_count, 1, "overlap within one run must not bump scan_count");
    }

    #[tokio::test]
    async fn second_run_classifies_reobserved_posts_as_updated() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert("g1", GroupScript::with_batches(vec![vec![obs("g1", "7", "cần mua")]]));

        let mut driver = book.driver();
        scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        // Clear the frontier so the second pass walks the same feed again.
        let mut driver = book.driver();
        fixture.frontier.lock().unwrap().set("g1", "different");
        // Marker "different" never appears, so the post gets reprocessed.
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert!(outcome.new_posts.is_empty());
        assert_eq!(outcome.updated_posts.len(), 1);
        assert_eq!(outcome.updated_posts[0].scan_count, 2);
    }

    #[tokio::test]
    async fn pure_overlap_batches_hit_no_new_posts_threshold() {
        let fixture = Fixture::new(&["mua"]);
        let overlap = vec![obs("g1", "7", "cần mua")];
        let book = ScriptBook::new();
        book.insert(
            "g1",
            // First batch processes the post, the next three are pure overlap.
            GroupScript::with_batches(vec![
                overlap.clone(),
                overlap.clone(),
                overlap.clone(),
                overlap.clone(),
                overlap.clone(),
            ]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::NoNewPostsThreshold);
        assert_eq!(outcome.new_posts.len(), 1);
        // 1 productive scroll + 3 overlap scrolls to reach the threshold.
        assert_eq!(outcome.scroll_count, 4);
    }

    #[tokio::test]
    async fn empty_batches_exhaust_extraction() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![vec![]; (MAX_EMPTY_SCROLLS + 2) as usize]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::ExtractionExhausted);
        assert_eq!(outcome.scroll_count, MAX_EMPTY_SCROLLS);
        assert!(outcome.new_posts.is_empty());
        // No post id was ever derived, so no frontier marker is written.
        assert_eq!(fixture.frontier.lock().unwrap().get("g1"), None);
    }

    #[tokio::test]
    async fn non_matching_posts_advance_frontier_but_produce_no_records() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![vec![
                obs("g1", "9", "hoàn toàn khác"),
                obs("g1", "8", "cũng khác"),
            ]]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::FeedEnd);
        assert!(outcome.new_posts.is_empty());
        assert_eq!(outcome.processed_count, 2);
        assert_eq!(fixture.frontier.lock().unwrap().get("g1"), Some("9".to_string()));
    }

    #[tokio::test]
    async fn access_denied_is_a_successful_empty_pass() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert("g1", GroupScript::denied());

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::AccessDenied);
        assert!(outcome.new_posts.is_empty());
        // The attempt still starts the cooldown clock.
        let stat = fixture.progress.lock().unwrap().get("g1").cloned().unwrap();
        assert_eq!(stat.total_scans, 1);
        assert_eq!(stat.error_count, 0);
    }

    #[tokio::test]
    async fn unproductive_history_tightens_the_pass_policy() {
        let fixture = Fixture::new(&["mua"]);
        fixture.progress.lock().unwrap().record_success("g1", 0, Utc::now());

        let overlap = vec![obs("g1", "7", "không match")];
        let book = ScriptBook::new();
        book.insert(
            "g1",
            GroupScript::with_batches(vec![overlap.clone(), overlap.clone(), overlap.clone(), overlap.clone()]),
        );

        let mut driver = book.driver();
        let outcome = scan_group(&mut driver, "g1", &fixture.ctx()).await.unwrap();

        // Base threshold is 3; the zero-yield history reduces it to 2, so the
        // pass gives up one overlap scroll earlier: 1 productive + 2 overlap.
        assert_eq!(outcome.stop, StopReason::NoNewPostsThreshold);
        assert_eq!(outcome.scroll_count, 3);
    }

    #[tokio::test]
    async fn driver_failure_propagates_without_post_pass_effects() {
        let fixture = Fixture::new(&["mua"]);
        let book = ScriptBook::new();
        book.insert("g1", GroupScript::failing(1, vec![vec![obs("g1", "1", "cần mua")]]));

        let mut driver = book.driver();
        let err = scan_group(&mut driver, "g1", &fixture.ctx()).await;
        assert!(err.is_err());
        assert!(fixture.progress.lock().unwrap().get("g1").is_none());
        assert_eq!(fixture.frontier.lock().unwrap().get("g1"), None);
    }
}
