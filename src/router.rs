//! Router/archiver — applies classification decisions and corrections.
//!
//! Filing is one logical step split into verifiable halves: the destination
//! write happens first and is checked before the source file is archived, so
//! a crash or error at any point leaves the item retryable, never half
//! filed. Re-running is safe — an existing destination containing the note's
//! content is treated as already written.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLog, AuditStatus};
use crate::classify::Decision;
use crate::config::{CategoryConfig, CategoryKind};
use crate::error::RouteError;
use crate::item::{ItemState, sanitize_filename};
use crate::store::{ItemStore, StoredItem, write_atomic};

/// Excerpt length in audit rows.
const EXCERPT_CHARS: usize = 50;

/// What the router did with an item.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Filed under a category; destination is vault-relative.
    Filed { destination: String },
    /// Marked for human review; left in the inbox.
    NeedsReview,
}

/// Applies decisions to items: files, archives, audits.
pub struct Router {
    vault: PathBuf,
    store: ItemStore,
    audit: AuditLog,
    categories: Vec<CategoryConfig>,
}

impl Router {
    pub fn new(
        vault: impl Into<PathBuf>,
        store: ItemStore,
        audit: AuditLog,
        categories: Vec<CategoryConfig>,
    ) -> Self {
        Self {
            vault: vault.into(),
            store,
            audit,
            categories,
        }
    }

    /// Apply a classification decision to an unprocessed item.
    pub async fn apply(
        &self,
        stored: &StoredItem,
        decision: &Decision,
    ) -> Result<RouteOutcome, RouteError> {
        match decision {
            Decision::Category { name, .. } => {
                let category = self
                    .categories
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| RouteError::UnknownCategory { name: name.clone() })?;

                let destination = self
                    .file_item(stored, category, ItemState::Filed, AuditStatus::Filed)
                    .await?;
                info!(
                    source_id = %stored.item.source_id,
                    category = %category.name,
                    destination = %destination,
                    "Filed"
                );
                Ok(RouteOutcome::Filed { destination })
            }
            Decision::NeedsReview { reason } => {
                self.mark_needs_review(stored, reason).await?;
                Ok(RouteOutcome::NeedsReview)
            }
        }
    }

    /// Retarget an item to `category` per a resolved correction.
    ///
    /// Works on any prior item: still unprocessed, pending review, or
    /// already filed (whose destination file is relocated).
    pub async fn apply_correction(
        &self,
        target: &StoredItem,
        category: &CategoryConfig,
    ) -> Result<String, RouteError> {
        let destination = self
            .file_item(target, category, ItemState::Fixed, AuditStatus::Fixed)
            .await?;
        info!(
            source_id = %target.item.source_id,
            category = %category.name,
            destination = %destination,
            "Fixed"
        );
        Ok(destination)
    }

    // ── Filing ──────────────────────────────────────────────────────

    /// The single logical filing step: destination write (verified), item
    /// header update, source archival, audit record.
    async fn file_item(
        &self,
        stored: &StoredItem,
        category: &CategoryConfig,
        state: ItemState,
        status: AuditStatus,
    ) -> Result<String, RouteError> {
        if !stored.item.state.can_transition(state) {
            warn!(
                source_id = %stored.item.source_id,
                from = stored.item.state.as_str(),
                to = state.as_str(),
                "Refusing illegal state transition"
            );
            return Err(RouteError::IllegalTransition {
                from: stored.item.state.as_str(),
                to: state.as_str(),
            });
        }

        // A previously filed item moves its existing note content; anything
        // else files the captured body.
        let (content, old_destination) = match &stored.item.destination {
            Some(old_rel) => {
                let old_abs = self.vault.join(old_rel);
                match tokio::fs::read_to_string(&old_abs).await {
                    Ok(content) => (content.trim_end().to_string(), Some(old_abs)),
                    Err(_) => (stored.item.body.clone(), None),
                }
            }
            None => (stored.item.body.clone(), None),
        };

        let dest_rel = self.write_destination(category, &content).await?;

        // Destination verified; only now is the old note removed.
        if let Some(old_abs) = old_destination {
            let new_abs = self.vault.join(&dest_rel);
            if old_abs != new_abs
                && let Err(e) = tokio::fs::remove_file(&old_abs).await
            {
                warn!(path = %old_abs.display(), error = %e, "Could not remove old destination");
            }
        }

        // Archive before the header flips: an archive failure leaves the
        // item unprocessed and retryable, never filed-but-stranded.
        let final_path = if stored.archived {
            stored.path.clone()
        } else {
            self.store
                .archive_item(&stored.path)
                .await
                .map_err(|e| RouteError::ArchiveMove {
                    path: stored.path.display().to_string(),
                    reason: e.to_string(),
                })?
        };

        let mut item = stored.item.clone();
        item.state = state;
        item.category = Some(category.name.clone());
        item.destination = Some(dest_rel.clone());
        item.classified_at = Some(Utc::now());
        self.store.rewrite(&final_path, &item).await?;

        match status {
            AuditStatus::Fixed => {
                let updated = self
                    .audit
                    .update_status(&item.source_id, AuditStatus::Fixed)
                    .await?;
                if !updated {
                    // Correction pre-empted classification; no row yet.
                    self.audit
                        .append(&self.entry(&item, &category.name, &dest_rel, AuditStatus::Fixed))
                        .await?;
                }
            }
            _ => {
                self.audit
                    .append(&self.entry(&item, &category.name, &dest_rel, status))
                    .await?;
            }
        }

        Ok(dest_rel)
    }

    async fn mark_needs_review(
        &self,
        stored: &StoredItem,
        reason: &str,
    ) -> Result<(), RouteError> {
        let mut item = stored.item.clone();
        item.state = ItemState::NeedsReview;
        self.store.rewrite(&stored.path, &item).await?;

        self.audit
            .append(&self.entry(&item, "unclear", "—", AuditStatus::NeedsReview))
            .await?;

        debug!(
            source_id = %item.source_id,
            reason = %reason,
            "Needs review, left in inbox"
        );
        Ok(())
    }

    fn entry(
        &self,
        item: &crate::item::Item,
        category: &str,
        destination: &str,
        status: AuditStatus,
    ) -> AuditEntry {
        AuditEntry {
            time: Utc::now(),
            excerpt: item.excerpt(EXCERPT_CHARS),
            category: category.to_string(),
            destination: destination.to_string(),
            status,
            source_id: item.source_id.clone(),
        }
    }

    // ── Destination naming ──────────────────────────────────────────

    /// Write `content` under the category's folder per its naming policy.
    /// Returns the vault-relative destination path.
    async fn write_destination(
        &self,
        category: &CategoryConfig,
        content: &str,
    ) -> Result<String, RouteError> {
        let write_err = |path: &Path, e: &dyn std::fmt::Display| RouteError::DestinationWrite {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let base = self.vault.join(&category.destination);
        let (dir, file_name) = match category.kind {
            CategoryKind::Person => (base, format!("{}.md", derive_person_name(content))),
            CategoryKind::Hierarchy => (
                base.join(derive_person_name(content)),
                format!("{}.md", sanitize_filename(content, 50)),
            ),
            CategoryKind::Flat => (base, format!("{}.md", sanitize_filename(content, 50))),
        };

        // Lazy folder creation on first write.
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_err(&dir, &e))?;

        let mut path = dir.join(&file_name);

        if category.kind == CategoryKind::Person && path.exists() {
            let existing = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| write_err(&path, &e))?;
            if !existing.contains(content.trim()) {
                let merged = format!("{}\n\n{}\n", existing.trim_end(), content.trim());
                write_atomic(&path, &merged)
                    .await
                    .map_err(|e| write_err(&path, &e))?;
            }
        } else {
            // Idempotent re-filing: identical content means the write already
            // happened. A true collision gets a numeric suffix.
            let mut n = 2;
            loop {
                match tokio::fs::read_to_string(&path).await {
                    Ok(existing) if existing.trim() == content.trim() => break,
                    Ok(_) => {
                        let stem = file_name.trim_end_matches(".md");
                        path = dir.join(format!("{stem}-{n}.md"));
                        n += 1;
                    }
                    Err(_) => {
                        write_atomic(&path, &format!("{}\n", content.trim_end()))
                            .await
                            .map_err(|e| write_err(&path, &e))?;
                        break;
                    }
                }
            }
        }

        let rel = path
            .strip_prefix(&self.vault)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        Ok(rel)
    }
}

/// Derive a person/folder name from note text: the first line up to a
/// separator, or its first two words, title-cased.
pub fn derive_person_name(text: &str) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    let head = first
        .split([':', ',', '-'])
        .next()
        .unwrap_or(first)
        .trim();
    let words: Vec<String> = head
        .split_whitespace()
        .take(2)
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    let name = sanitize_filename(&words.join(" "), 50);
    if name == "capture" { "Unnamed".into() } else { name }
}
