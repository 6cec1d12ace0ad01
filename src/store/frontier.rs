//! Frontier index: newest confirmed post id per group.
//!
//! The marker for a group is the first post id observed during its most
//! recently completed scan pass. It is purely a scan-termination boundary
//! for the next run (stop when the marker is re-encountered), never a
//! content cache. Each group's marker is written by that group's own scan
//! lane only, once per run.

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Snapshot envelope: `{ "lastUpdate": …, "posts": { groupId: postId } }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrontierSnapshot {
    last_update: String,
    posts: HashMap<String, String>,
}

/// Older snapshots were a bare `{ groupId: postId }` map; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FrontierDocument {
    Envelope(FrontierSnapshot),
    Bare(HashMap<String, String>),
}

/// Per-group marker of the newest post id from the last completed scan.
#[derive(Debug, Clone, Default)]
pub struct FrontierIndex {
    markers: HashMap<String, String>,
}

impl FrontierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The marker for a group, if any completed scan recorded one.
    pub fn get(&self, group_id: &str) -> Option<String> {
        self.markers.get(group_id).cloned()
    }

    /// Record (or re-affirm) the marker for a group.
    pub fn set(&mut self, group_id: &str, post_id: &str) {
        self.markers.insert(group_id.to_string(), post_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Load a snapshot, degrading to an empty index on any failure.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<FrontierDocument>(&raw) {
                Ok(FrontierDocument::Envelope(snapshot)) => {
                    info!(count = snapshot.posts.len(), path = %path.display(), "Loaded frontier index");
                    Self { markers: snapshot.posts }
                }
                Ok(FrontierDocument::Bare(map)) => {
                    info!(count = map.len(), path = %path.display(), "Loaded frontier index (bare format)");
                    Self { markers: map }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Frontier snapshot unreadable; starting empty");
                    Self::new()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No frontier snapshot; starting empty");
                Self::new()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let snapshot = FrontierSnapshot {
            last_update: Utc::now().to_rfc3339(),
            posts: self.markers.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        info!(count = self.markers.len(), path = %path.display(), "Saved frontier index");
        Ok(())
    }
}
