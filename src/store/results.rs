//! Deduplicated result store keyed by post URL.
//!
//! `merge` is the single write path: it either creates a record (first
//! sighting) or refreshes an existing one. Field precedence on refresh is
//! fixed by [`merge_post_record`]: identity fields and `first_seen` are
//! preserved, the preview / matched keywords / last-seen timestamps are
//! overwritten, and `scan_count` grows by one per merge call.
//!
//! The snapshot file is a plain JSON array of records sorted by `lastSeen`
//! descending, matching the format earlier iterations of this tool wrote.

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::models::{PostCandidate, PostRecord};

/// In-memory map of post URL to record, with JSON snapshot load/save.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    records: HashMap<String, PostRecord>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a keyword-matched candidate into the store.
    ///
    /// Returns `(is_new, record)`: `is_new` is true when no record existed
    /// for the candidate's URL and one was created with `scan_count = 1`.
    /// On refresh the existing record's `first_seen` and identity fields are
    /// kept and `scan_count` is incremented. Callers must not merge the same
    /// URL twice within one run; the scan controller's processed set
    /// enforces that.
    pub fn merge(&mut self, candidate: PostCandidate, now: DateTime<Utc>) -> (bool, PostRecord) {
        match self.records.get(&candidate.post_url) {
            Some(existing) => {
                let updated = merge_post_record(existing, &candidate, now);
                self.records.insert(candidate.post_url, updated.clone());
                (false, updated)
            }
            None => {
                let created = PostRecord {
                    post_url: candidate.post_url.clone(),
                    group_id: candidate.group_id,
                    post_id: candidate.post_id,
                    author_name: candidate.author_name,
                    user_id: candidate.user_id,
                    text_preview: candidate.text_preview,
                    matched_keywords: candidate.matched_keywords,
                    origin_timestamp: candidate.origin_timestamp,
                    first_seen: now,
                    last_seen: now,
                    last_updated: now,
                    scan_count: 1,
                };
                self.records.insert(candidate.post_url, created.clone());
                (true, created)
            }
        }
    }

    pub fn get(&self, post_url: &str) -> Option<&PostRecord> {
        self.records.get(post_url)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, sorted by `last_seen` descending (newest first).
    pub fn sorted_records(&self) -> Vec<PostRecord> {
        let mut all: Vec<PostRecord> = self.records.values().cloned().collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all
    }

    /// Iterate records in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &PostRecord> {
        self.records.values()
    }

    /// Load a snapshot, degrading to an empty store on any failure.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<Vec<PostRecord>>(&raw) {
                Ok(list) => {
                    let records: HashMap<String, PostRecord> = list
                        .into_iter()
                        .map(|record| (record.post_url.clone(), record))
                        .collect();
                    info!(count = records.len(), path = %path.display(), "Loaded result store");
                    Self { records }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Result snapshot unreadable; starting empty");
                    Self::new()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No result snapshot; starting empty");
                Self::new()
            }
        }
    }

    /// Write the snapshot as a sorted JSON array.
    pub async fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let all = self.sorted_records();
        let json = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(path, json).await?;
        info!(count = all.len(), path = %path.display(), "Saved result store");
        Ok(())
    }
}

/// Produce the refreshed record for an already-known post.
///
/// Precedence: `first_seen`, `post_url`, `group_id`, `post_id`,
/// `author_name`, `user_id`, and `origin_timestamp` come from the existing
/// record; `text_preview` and `matched_keywords` come from the new
/// candidate; `last_seen` and `last_updated` are set to `now`; `scan_count`
/// is the existing count plus one.
fn merge_post_record(
    existing: &PostRecord,
    candidate: &PostCandidate,
    now: DateTime<Utc>,
) -> PostRecord {
    PostRecord {
        post_url: existing.post_url.clone(),
        group_id: existing.group_id.clone(),
        post_id: existing.post_id.clone(),
        author_name: existing.author_name.clone(),
        user_id: existing.user_id.clone(),
        text_preview: candidate.text_preview.clone(),
        matched_keywords: candidate.matched_keywords.clone(),
        origin_timestamp: existing.origin_timestamp,
        first_seen: existing.first_seen,
        last_seen: now,
        last_updated: now,
        scan_count: existing.scan_count + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(url: &str, preview: &str) -> PostCandidate {
        PostCandidate {
            post_url: url.to_string(),
            group_id: "g1".to_string(),
            post_id: "42".to_string(),
            author_name: "An".to_string(),
            user_id: "7".to_string(),
            text_preview: preview.to_string(),
            matched_keywords: vec!["mua".to_string()],
            origin_timestamp: None,
        }
    }

    #[test]
    fn first_merge_creates_record() {
        let mut store = ResultStore::new();
        let now = Utc::now();
        let (is_new, record) = store.merge(candidate("https://x/posts/42", "cần mua"), now);

        assert!(is_new);
        assert_eq!(record.scan_count, 1);
        assert_eq!(record.first_seen, now);
        assert_eq!(record.last_seen, now);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replayed_merges_increment_scan_count_and_keep_first_seen() {
        let mut store = ResultStore::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);
        let t2 = t0 + Duration::hours(2);

        store.merge(candidate("https://x/posts/42", "cần mua"), t0);
        let (is_new, r1) = store.merge(candidate("https://x/posts/42", "cần mua"), t1);
        let (_, r2) = store.merge(candidate("https://x/posts/42", "cần mua"), t2);

        assert!(!is_new);
        assert_eq!(r1.scan_count, 2);
        assert_eq!(r2.scan_count, 3);
        assert_eq!(r2.first_seen, t0);
        assert_eq!(r2.last_seen, t2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn refresh_overwrites_preview_and_keywords_only() {
        let mut store = ResultStore::new();
        let t0 = Utc::now();
        store.merge(candidate("https://x/posts/42", "bản cũ"), t0);

        let mut edited = candidate("https://x/posts/42", "bản đã sửa");
        edited.matched_keywords = vec!["bán".to_string()];
        edited.author_name = "Someone Else".to_string();
        let (_, record) = store.merge(edited, t0 + Duration::minutes(5));

        assert_eq!(record.text_preview, "bản đã sửa");
        assert_eq!(record.matched_keywords, vec!["bán"]);
        // Identity fields stay pinned to the first sighting.
        assert_eq!(record.author_name, "An");
        assert_eq!(record.group_id, "g1");
    }

    #[test]
    fn sorted_records_newest_first() {
        let mut store = ResultStore::new();
        let t0 = Utc::now();
        store.merge(candidate("https://x/posts/1", "a"), t0);
        store.merge(candidate("https://x/posts/2", "b"), t0 + Duration::minutes(1));
        store.merge(candidate("https://x/posts/3", "c"), t0 - Duration::minutes(1));

        let sorted = store.sorted_records();
        assert_eq!(sorted[0].post_url, "https://x/posts/2");
        assert_eq!(sorted[2].post_url, "https://x/posts/3");
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("groupwatch-results-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("results.json");

        let mut store = ResultStore::new();
        store.merge(candidate("https://x/posts/42", "cần mua"), Utc::now());
        store.save(&path).await.unwrap();

        let loaded = ResultStore::load(&path).await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("https://x/posts/42").is_some());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_snapshot_loads_empty() {
        let loaded = ResultStore::load(Path::new("/nonexistent/results.json")).await;
        assert!(loaded.is_empty());
    }
}
