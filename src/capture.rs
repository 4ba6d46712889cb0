//! Capture writer — turns raw messages into durable pending items.
//!
//! Per message: dedup check → atomic write → cursor advance, in that order.
//! A crash between the write and the cursor save re-delivers the message on
//! the next poll, where the dedup check absorbs it (at-least-once).

use regex::Regex;
use std::path::PathBuf;
use tracing::debug;

use crate::error::StoreError;
use crate::item::Item;
use crate::source::{Cursor, CursorStore, RawMessage};
use crate::store::ItemStore;

/// What happened to one raw message.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// A new capture item was written.
    Captured(PathBuf),
    /// A fix-command item was written for the resolver to consume.
    FixQueued(PathBuf),
    /// An item with this source id already exists; nothing written.
    Deduped,
    /// Blank text; nothing to capture.
    SkippedEmpty,
}

/// Writes qualifying messages into the item store.
pub struct CaptureWriter {
    store: ItemStore,
    cursor: CursorStore,
    fix_pattern: Regex,
}

impl CaptureWriter {
    pub fn new(store: ItemStore, cursor: CursorStore, fix_pattern: Regex) -> Self {
        Self {
            store,
            cursor,
            fix_pattern,
        }
    }

    /// Whether a message is a correction rather than a capture.
    ///
    /// Either it replies to a prior message (thread correction) or its text
    /// matches the correction prefix (legacy explicit correction).
    pub fn is_correction(&self, msg: &RawMessage) -> bool {
        msg.reply_to_id.is_some() || self.fix_pattern.is_match(msg.text.trim())
    }

    /// Durably capture one message and advance the cursor past it.
    pub async fn capture(&self, msg: &RawMessage) -> Result<CaptureOutcome, StoreError> {
        let outcome = self.write(msg).await?;
        // Deduped and blank messages advance the cursor too; they are
        // already accounted for and must not stall ingestion.
        self.cursor.save(Cursor(msg.position)).await?;
        Ok(outcome)
    }

    async fn write(&self, msg: &RawMessage) -> Result<CaptureOutcome, StoreError> {
        if msg.text.trim().is_empty() {
            return Ok(CaptureOutcome::SkippedEmpty);
        }

        if self.store.contains(&msg.source_id).await? {
            debug!(source_id = %msg.source_id, "Duplicate message, skipping");
            return Ok(CaptureOutcome::Deduped);
        }

        if self.is_correction(msg) {
            let path = self.store.write_new(&Item::new_fix(msg)).await?;
            debug!(source_id = %msg.source_id, path = %path.display(), "Queued fix command");
            Ok(CaptureOutcome::FixQueued(path))
        } else {
            let path = self.store.write_new(&Item::new_capture(msg)).await?;
            debug!(source_id = %msg.source_id, path = %path.display(), "Captured");
            Ok(CaptureOutcome::Captured(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use chrono::Utc;

    fn writer() -> (tempfile::TempDir, CaptureWriter, CursorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::new(dir.path().join("Inbox"), dir.path().join("Archive"));
        let cursor = CursorStore::new(dir.path().join("state/last_processed"));
        let pattern = regex::RegexBuilder::new(r"^fix:\s*(.+)")
            .case_insensitive(true)
            .build()
            .unwrap();
        let writer = CaptureWriter::new(store, cursor.clone(), pattern);
        (dir, writer, cursor)
    }

    fn msg(id: &str, text: &str, position: i64) -> RawMessage {
        RawMessage {
            source_id: id.into(),
            sender: "+1555".into(),
            text: text.into(),
            position,
            timestamp: Utc::now(),
            reply_to_id: None,
        }
    }

    #[tokio::test]
    async fn capture_writes_item_and_advances_cursor() {
        let (_dir, writer, cursor) = writer();
        let outcome = writer.capture(&msg("G1", "buy milk", 10)).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Captured(_)));
        assert_eq!(cursor.load().await, Some(Cursor(10)));
    }

    #[tokio::test]
    async fn same_source_id_twice_yields_one_item() {
        let (_dir, writer, _cursor) = writer();
        writer.capture(&msg("G1", "buy milk", 10)).await.unwrap();
        let second = writer.capture(&msg("G1", "buy milk", 10)).await.unwrap();
        assert!(matches!(second, CaptureOutcome::Deduped));

        let items = writer.store.list_active().await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn prefix_message_becomes_fix_command() {
        let (_dir, writer, _cursor) = writer();
        let outcome = writer.capture(&msg("G2", "Fix: tasks", 20)).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::FixQueued(_)));

        let fixes = writer.store.list_pending_fixes().await.unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].item.kind, ItemKind::FixCommand);
    }

    #[tokio::test]
    async fn reply_message_becomes_fix_command() {
        let (_dir, writer, _cursor) = writer();
        let mut reply = msg("G3", "move to people", 30);
        reply.reply_to_id = Some("G1".into());
        let outcome = writer.capture(&reply).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::FixQueued(_)));

        let fixes = writer.store.list_pending_fixes().await.unwrap();
        assert_eq!(fixes[0].item.reply_to.as_deref(), Some("G1"));
    }

    #[tokio::test]
    async fn blank_text_skips_but_advances_cursor() {
        let (_dir, writer, cursor) = writer();
        let outcome = writer.capture(&msg("G4", "   ", 40)).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::SkippedEmpty));
        assert_eq!(cursor.load().await, Some(Cursor(40)));
        assert!(writer.store.list_active().await.unwrap().is_empty());
    }
}
