//! End-of-run statistics over the result store.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use tracing::info;

use crate::store::results::ResultStore;

/// Aggregates computed from the full result store at the end of a run.
#[derive(Debug)]
pub struct RunStats {
    pub total_posts: usize,
    pub posts_last_24h: usize,
    pub posts_per_group: Vec<(String, usize)>,
    pub top_keywords: Vec<(String, usize)>,
}

const TOP_KEYWORDS: usize = 10;

impl RunStats {
    pub fn collect(store: &ResultStore, now: DateTime<Utc>) -> Self {
        let day_ago = now - Duration::hours(24);

        let mut per_group: HashMap<&str, usize> = HashMap::new();
        let mut per_keyword: HashMap<&str, usize> = HashMap::new();
        let mut recent = 0usize;

        for record in store.iter() {
            *per_group.entry(record.group_id.as_str()).or_default() += 1;
            for keyword in &record.matched_keywords {
                *per_keyword.entry(keyword.as_str()).or_default() += 1;
            }
            if record.last_seen >= day_ago {
                recent += 1;
            }
        }

        // Descending by count, group id as tiebreak for stable output.
        let posts_per_group = per_group
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
            .map(|(g, n)| (g.to_string(), n))
            .collect();
        let top_keywords = per_keyword
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
            .take(TOP_KEYWORDS)
            .map(|(k, n)| (k.to_string(), n))
            .collect();

        Self {
            total_posts: store.len(),
            posts_last_24h: recent,
            posts_per_group,
            top_keywords,
        }
    }

    pub fn log(&self) {
        info!(
            total = self.total_posts,
            last_24h = self.posts_last_24h,
            "Result store summary"
        );
        for (group_id, count) in &self.posts_per_group {
            info!(%group_id, posts = count, "Group totals");
        }
        if !self.top_keywords.is_empty() {
            let ranked = self
                .top_keywords
                .iter()
                .map(|(k, n)| format!("{k} ({n})"))
                .join(", ");
            info!(%ranked, "Top keywords");
        }
    }
}
