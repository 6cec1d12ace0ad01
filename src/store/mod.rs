//! Persistent state shared across runs.
//!
//! Three independent flat snapshot documents, each loaded at startup and
//! rewritten when a run completes:
//!
//! - [`results::ResultStore`]: deduplicated post records keyed by post URL
//! - [`frontier::FrontierIndex`]: newest confirmed post id per group
//! - [`progress::ProgressCache`]: per-group scan statistics driving cooldown
//!
//! The documents are deliberately separate files; a crash between writes
//! leaves each individually self-consistent, and no cross-document
//! transaction is assumed. During a run the stores are shared between
//! concurrent scan lanes behind `Mutex` handles, locked only for short
//! critical sections with no await points inside.

pub mod frontier;
pub mod progress;
pub mod results;
