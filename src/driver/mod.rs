//! Page driver boundary: navigation, scrolling, and post extraction.
//!
//! The scan controller only ever talks to a [`PageDriver`], never to a real
//! browser. The production implementation ([`browserless::BrowserlessDriver`])
//! drives a remote rendering service; tests script the driver with canned
//! observation batches and never touch the network.
//!
//! # Error classification
//!
//! Access denial is not an error: [`PageDriver::open`] returns `Ok(false)`
//! and the pass completes empty. Everything in [`DriverError`] is a
//! retryable failure absorbed by the retry supervisor — navigation/timeout
//! failures and anything unclassified get identical handling.

pub mod browserless;
pub mod cookies;

#[cfg(test)]
pub mod scripted;

use thiserror::Error;

use crate::models::RawPostObservation;

/// Failures a page driver can surface. All variants are retryable.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The target feed could not be loaded or rendered within bounds.
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Transport-level failure talking to the rendering service
    /// (connection refused, request timeout, TLS, …).
    #[error("render request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The rendering service answered with something unusable.
    #[error("driver protocol error: {0}")]
    Protocol(String),
}

/// Capability to scroll-paginate one group's feed and extract posts.
///
/// One driver instance corresponds to one page session; the scheduler
/// creates a fresh instance per scan lane. The driver is responsible for
/// intra-session dedup: an observation handed back once in a session is not
/// returned again by [`extract_observations`](PageDriver::extract_observations).
#[allow(async_fn_in_trait)]
pub trait PageDriver {
    /// Navigate to the group's chronological feed view.
    ///
    /// `Ok(false)` means the feed is not viewable for the current session —
    /// an expected condition, not an error.
    async fn open(&mut self, group_id: &str) -> Result<bool, DriverError>;

    /// Advance the viewport one step. `Ok(false)` signals feed end (page
    /// bottom reached, or the viewport is stuck).
    async fn scroll_step(&mut self) -> Result<bool, DriverError>;

    /// Best-effort wait for content stabilization. Never fails the caller;
    /// a timeout simply means "proceed with whatever is present".
    async fn await_stable(&mut self);

    /// The observations that became visible since the last call in this
    /// session. May be empty.
    async fn extract_observations(&mut self) -> Result<Vec<RawPostObservation>, DriverError>;
}
