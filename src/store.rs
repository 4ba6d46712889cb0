//! File-backed item store: an inbox of pending items plus an archive.
//!
//! Every mutation is individually atomic — new items and rewrites go through
//! write-to-temp-then-rename, moves are renames — so a crash mid-operation
//! never leaves a half-written document visible to the pipeline.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StoreError;
use crate::item::{Item, ItemKind, ItemState, sanitize_filename};

/// An item together with where it lives on disk.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub path: PathBuf,
    pub item: Item,
    /// True when the file sits in the archive rather than the inbox.
    pub archived: bool,
}

/// Directory store for items.
#[derive(Debug, Clone)]
pub struct ItemStore {
    inbox: PathBuf,
    archive: PathBuf,
}

impl ItemStore {
    pub fn new(inbox: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            archive: archive.into(),
        }
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox
    }

    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.inbox).await?;
        tokio::fs::create_dir_all(&self.archive).await?;
        Ok(())
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Persist a new item into the inbox. Returns its path.
    ///
    /// Callers are expected to have checked dedup first; a file-name
    /// collision (two captures with the same first line in the same second)
    /// gets a numeric suffix rather than clobbering.
    pub async fn write_new(&self, item: &Item) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.inbox).await?;

        let stamp = item.captured_at.format("%Y-%m-%dT%H%M%S");
        let snippet = match item.kind {
            ItemKind::Capture => sanitize_filename(&item.body, 50),
            ItemKind::FixCommand => "fix-command".to_string(),
        };

        let mut path = self.inbox.join(format!("{stamp}-{snippet}.md"));
        let mut n = 2;
        while path.exists() {
            path = self.inbox.join(format!("{stamp}-{snippet}-{n}.md"));
            n += 1;
        }

        write_atomic(&path, &item.to_document()).await?;
        Ok(path)
    }

    /// Rewrite an existing item in place, atomically.
    pub async fn rewrite(&self, path: &Path, item: &Item) -> Result<(), StoreError> {
        write_atomic(path, &item.to_document()).await
    }

    /// Move an item file from the inbox into the archive. Returns the new path.
    pub async fn archive_item(&self, path: &Path) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.archive).await?;
        let name = path
            .file_name()
            .ok_or_else(|| StoreError::Malformed {
                path: path.display().to_string(),
                reason: "item path has no file name".into(),
            })?;
        let dest = self.archive.join(name);
        move_file(path, &dest).await?;
        Ok(dest)
    }

    /// Delete an item file (consumed fix commands only).
    pub async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Whether any item — active or archived — carries this source id.
    pub async fn contains(&self, source_id: &str) -> Result<bool, StoreError> {
        Ok(self.find(source_id).await?.is_some())
    }

    /// Find an item by source id, searching the inbox then the archive.
    pub async fn find(&self, source_id: &str) -> Result<Option<StoredItem>, StoreError> {
        for (dir, archived) in [(&self.inbox, false), (&self.archive, true)] {
            for stored in self.scan_dir(dir, archived).await? {
                if stored.item.source_id == source_id {
                    return Ok(Some(stored));
                }
            }
        }
        Ok(None)
    }

    /// All items currently in the inbox.
    pub async fn list_active(&self) -> Result<Vec<StoredItem>, StoreError> {
        self.scan_dir(&self.inbox, false).await
    }

    /// Captures awaiting classification.
    pub async fn list_unprocessed(&self) -> Result<Vec<StoredItem>, StoreError> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.item.is_unprocessed_capture())
            .collect())
    }

    /// Fix commands awaiting resolution.
    pub async fn list_pending_fixes(&self) -> Result<Vec<StoredItem>, StoreError> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.item.kind == ItemKind::FixCommand)
            .collect())
    }

    /// Needs-review items that have not had their nudge sent yet.
    pub async fn list_needs_feedback(&self) -> Result<Vec<StoredItem>, StoreError> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|s| {
                s.item.state == ItemState::NeedsReview && s.item.feedback_sent_at.is_none()
            })
            .collect())
    }

    async fn scan_dir(&self, dir: &Path, archived: bool) -> Result<Vec<StoredItem>, StoreError> {
        let mut out = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match Item::parse_document(&path.display().to_string(), &content) {
                Ok(item) => out.push(StoredItem {
                    path,
                    item,
                    archived,
                }),
                Err(e) => {
                    // Foreign or hand-edited files share the directory; skip them.
                    warn!(path = %path.display(), error = %e, "Skipping unparseable document");
                }
            }
        }

        out.sort_by(|a, b| a.item.captured_at.cmp(&b.item.captured_at));
        Ok(out)
    }
}

/// Write `content` to `path` atomically via a same-directory temp file.
pub async fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("md.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Move a file, falling back to copy+remove across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<(), StoreError> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawMessage;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, ItemStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::new(dir.path().join("Inbox"), dir.path().join("Archive"));
        (dir, store)
    }

    fn capture(id: &str, text: &str) -> Item {
        Item::new_capture(&RawMessage {
            source_id: id.into(),
            sender: "+1555".into(),
            text: text.into(),
            position: 1,
            timestamp: Utc::now(),
            reply_to_id: None,
        })
    }

    #[tokio::test]
    async fn write_and_find_round_trip() {
        let (_dir, store) = store();
        let path = store.write_new(&capture("G1", "buy milk")).await.unwrap();
        assert!(path.exists());

        let found = store.find("G1").await.unwrap().unwrap();
        assert_eq!(found.item.body, "buy milk");
        assert!(!found.archived);
        assert!(store.find("G2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_searches_archive_too() {
        let (_dir, store) = store();
        let path = store.write_new(&capture("G1", "buy milk")).await.unwrap();
        store.archive_item(&path).await.unwrap();

        assert!(!path.exists());
        let found = store.find("G1").await.unwrap().unwrap();
        assert!(found.archived);
        assert!(store.contains("G1").await.unwrap());
    }

    #[tokio::test]
    async fn filename_collision_gets_suffix() {
        let (_dir, store) = store();
        let mut a = capture("G1", "same text");
        let mut b = capture("G2", "same text");
        let stamp = a.captured_at;
        b.captured_at = stamp; // force identical stamp+snippet
        a.captured_at = stamp;

        let p1 = store.write_new(&a).await.unwrap();
        let p2 = store.write_new(&b).await.unwrap();
        assert_ne!(p1, p2);
        assert!(store.contains("G1").await.unwrap());
        assert!(store.contains("G2").await.unwrap());
    }

    #[tokio::test]
    async fn listings_filter_by_state_and_kind() {
        let (_dir, store) = store();
        store.write_new(&capture("G1", "pending")).await.unwrap();

        let mut reviewed = capture("G2", "unclear thing");
        reviewed.state = ItemState::NeedsReview;
        store.write_new(&reviewed).await.unwrap();

        let mut fix = capture("G3", "fix: tasks");
        fix.kind = ItemKind::FixCommand;
        store.write_new(&fix).await.unwrap();

        let unprocessed = store.list_unprocessed().await.unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].item.source_id, "G1");

        let fixes = store.list_pending_fixes().await.unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].item.source_id, "G3");

        let feedback = store.list_needs_feedback().await.unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].item.source_id, "G2");
    }

    #[tokio::test]
    async fn feedback_listing_excludes_already_sent() {
        let (_dir, store) = store();
        let mut reviewed = capture("G1", "unclear");
        reviewed.state = ItemState::NeedsReview;
        reviewed.feedback_sent_at = Some(Utc::now());
        store.write_new(&reviewed).await.unwrap();

        assert!(store.list_needs_feedback().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rewrite_is_visible_on_next_scan() {
        let (_dir, store) = store();
        let path = store.write_new(&capture("G1", "note")).await.unwrap();

        let mut stored = store.find("G1").await.unwrap().unwrap();
        stored.item.state = ItemState::NeedsReview;
        store.rewrite(&path, &stored.item).await.unwrap();

        let again = store.find("G1").await.unwrap().unwrap();
        assert_eq!(again.item.state, ItemState::NeedsReview);
    }

    #[tokio::test]
    async fn scan_skips_foreign_files() {
        let (_dir, store) = store();
        store.ensure_dirs().await.unwrap();
        tokio::fs::write(store.inbox_dir().join("notes.md"), "just a plain file")
            .await
            .unwrap();
        tokio::fs::write(store.inbox_dir().join("image.png"), [0u8; 4])
            .await
            .unwrap();

        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_dir, store) = store();
        let path = store.write_new(&capture("G1", "note")).await.unwrap();
        store.remove(&path).await.unwrap();
        store.remove(&path).await.unwrap();
        assert!(!store.contains("G1").await.unwrap());
    }
}
