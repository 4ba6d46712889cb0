//! Message source abstraction.
//!
//! The external message store is a foreign, append-only, timestamp-ordered
//! log. The pipeline only ever reads it through the `MessageSource` trait, so
//! the core is testable against `MemorySource` instead of the real
//! platform-specific store.

pub mod chat_db;
pub mod memory;

pub use chat_db::ChatDbSource;
pub use memory::MemorySource;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{SourceError, StoreError};

/// One message as read from the external log.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Globally unique message identifier assigned by the source.
    pub source_id: String,
    /// Sending identity (phone number, address).
    pub sender: String,
    pub text: String,
    /// Source-native monotonic position; the cursor advances over this.
    pub position: i64,
    pub timestamp: DateTime<Utc>,
    /// Source id of the message this one replies to, if any.
    pub reply_to_id: Option<String>,
}

/// Ingestion position over the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(pub i64);

/// Read-only cursor over the external message log.
///
/// `poll` must return messages strictly after `cursor`, ordered by position
/// ascending, filtered to the configured self handles, and must be free of
/// side effects so repeated polls with the same cursor are safe.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn poll(&self, cursor: Option<Cursor>) -> Result<Vec<RawMessage>, SourceError>;
}

/// Persisted cursor state, one value in one file.
///
/// The cursor is advanced only after a message is durably captured; a crash
/// before the save re-delivers at most one poll window, which capture dedup
/// absorbs.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cursor. A missing or unreadable value is treated
    /// as "no cursor" — the dedup path makes re-delivery harmless.
    pub async fn load(&self) -> Option<Cursor> {
        let raw = tokio::fs::read_to_string(&self.path).await.ok()?;
        match raw.trim().parse::<i64>() {
            Ok(pos) => Some(Cursor(pos)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt cursor file, re-ingesting window");
                None
            }
        }
    }

    /// Persist the cursor atomically (write-to-temp-then-rename).
    pub async fn save(&self, cursor: Cursor) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, cursor.0.to_string()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
