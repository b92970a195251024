//! Filesystem event scrying.
//!
//! The [`Scryer`] consumes raw OS notifications for a set of watched
//! directory trees, translates them into typed node events, validates
//! them against stored chain state and appends them to the event store.
//! The [`walker`] reconciles the store with on-disk state at startup and
//! whenever a populated subtree arrives in one move.

pub mod event;
pub mod scryer;
pub mod walker;

use std::fmt;

use crate::store::StoreError;

pub use event::NodeEvent;
pub use scryer::{Scryer, PROCESSED_CHANNEL_CAPACITY};
pub use walker::{scried_nodes, seed_directory, ScryedDirectory};

/// Errors raised while scrying.
///
/// `ValidationFailed`, `Unsupported` and `AlreadyTracked` describe
/// events that are dropped while the run loop continues; `Store` is
/// fatal to the run loop.
#[derive(Debug)]
pub enum ScryError {
    /// The event does not satisfy the validation rules for its kind.
    ValidationFailed(String),
    /// The event concerns a node that is neither a file nor a directory.
    Unsupported(String),
    /// A create was observed for an inode that already has a live chain
    /// (typically the watcher echoing a node the walker just seeded).
    AlreadyTracked(String),
    /// A directory walk failed.
    Walk(String),
    /// The OS watcher could not be created or armed.
    Notify(String),
    /// The event store failed.
    Store(StoreError),
}

impl fmt::Display for ScryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScryError::ValidationFailed(msg) => write!(f, "event validation failed: {}", msg),
            ScryError::Unsupported(msg) => write!(f, "unsupported node: {}", msg),
            ScryError::AlreadyTracked(msg) => write!(f, "already tracked: {}", msg),
            ScryError::Walk(msg) => write!(f, "walk failed: {}", msg),
            ScryError::Notify(msg) => write!(f, "watcher error: {}", msg),
            ScryError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for ScryError {}

impl From<StoreError> for ScryError {
    fn from(e: StoreError) -> Self {
        ScryError::Store(e)
    }
}
