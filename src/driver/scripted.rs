//! Scripted fake driver for controller and scheduler tests.
//!
//! Tests register a [`GroupScript`] per group: whether the feed opens, how
//! many `open` calls should fail first, and the exact observation batches
//! each scroll step yields. The script map is shared behind a mutex so a
//! factory closure can hand an independent driver to every scan lane while
//! failure counters still decrement globally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use super::{DriverError, PageDriver};
use crate::models::RawPostObservation;

/// Canned behavior for one group.
#[derive(Debug, Clone, Default)]
pub struct GroupScript {
    /// `open` reports the feed as not viewable.
    pub access_denied: bool,
    /// Number of initial `open` calls that fail with a navigation error.
    pub fail_opens: u32,
    /// One observation batch per scroll step; the feed ends after the last.
    pub batches: Vec<Vec<RawPostObservation>>,
}

impl GroupScript {
    pub fn with_batches(batches: Vec<Vec<RawPostObservation>>) -> Self {
        Self { batches, ..Self::default() }
    }

    pub fn denied() -> Self {
        Self { access_denied: true, ..Self::default() }
    }

    pub fn failing(fail_opens: u32, batches: Vec<Vec<RawPostObservation>>) -> Self {
        Self { fail_opens, batches, ..Self::default() }
    }
}

/// Shared script table; clone it into a factory closure.
#[derive(Debug, Clone, Default)]
pub struct ScriptBook {
    scripts: Arc<Mutex<HashMap<String, GroupScript>>>,
}

impl ScriptBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, group_id: &str, script: GroupScript) {
        self.scripts.lock().unwrap().insert(group_id.to_string(), script);
    }

    /// A fresh driver session over this book.
    pub fn driver(&self) -> ScriptedDriver {
        ScriptedDriver { book: self.clone(), batches: Vec::new(), cursor: 0 }
    }
}

/// One scripted page session.
#[derive(Debug)]
pub struct ScriptedDriver {
    book: ScriptBook,
    batches: Vec<Vec<RawPostObservation>>,
    cursor: usize,
}

impl PageDriver for ScriptedDriver {
    async fn open(&mut self, group_id: &str) -> Result<bool, DriverError> {
        let mut scripts = self.book.scripts.lock().unwrap();
        let script = scripts
            .get_mut(group_id)
            .ok_or_else(|| DriverError::Protocol(format!("no script for group {group_id}")))?;

        if script.fail_opens > 0 {
            script.fail_opens -= 1;
            return Err(DriverError::Navigation {
                url: format!("https://www.facebook.com/groups/{group_id}"),
                reason: "scripted navigation failure".to_string(),
            });
        }
        if script.access_denied {
            return Ok(false);
        }

        self.batches = script.batches.clone();
        self.cursor = 0;
        Ok(true)
    }

    async fn scroll_step(&mut self) -> Result<bool, DriverError> {
        Ok(self.cursor < self.batches.len())
    }

    async fn await_stable(&mut self) {}

    async fn extract_observations(&mut self) -> Result<Vec<RawPostObservation>, DriverError> {
        let batch = self.batches.get(self.cursor).cloned().unwrap_or_default();
        self.cursor += 1;
        Ok(batch)
    }
}

/// An observation with a permalink in `/posts/<id>` form.
pub fn obs(group_id: &str, post_id: &str, text: &str) -> RawPostObservation {
    RawPostObservation {
        text: text.to_string(),
        post_url: format!("https://www.facebook.com/groups/{group_id}/posts/{post_id}"),
        author_name: format!("Author {post_id}"),
        user_id: "100".to_string(),
        origin_timestamp: Some(Utc::now()),
    }
}

/// Same as [`obs`] but published `days_ago` days in the past.
pub fn aged_obs(group_id: &str, post_id: &str, text: &str, days_ago: i64) -> RawPostObservation {
    RawPostObservation {
        origin_timestamp: Some(Utc::now() - Duration::days(days_ago)),
        ..obs(group_id, post_id, text)
    }
}

/// Same as [`obs`] with an explicit timestamp.
pub fn obs_at(
    group_id: &str,
    post_id: &str,
    text: &str,
    at: Option<DateTime<Utc>>,
) -> RawPostObservation {
    RawPostObservation { origin_timestamp: at, ..obs(group_id, post_id, text) }
}
