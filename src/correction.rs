//! Correction resolver — maps fix commands to a target item and category.
//!
//! Two correction shapes: a reply to a previously captured message (thread
//! correction, targets that exact item) and the legacy explicit prefix
//! ("fix: tasks", targets the most recent audit entry). Resolution failures
//! are terminal — a stale correction is discarded, never retried.

use regex::Regex;

use crate::audit::AuditLog;
use crate::config::CategoryConfig;
use crate::error::CorrectionError;
use crate::store::{ItemStore, StoredItem};

/// Resolves fix commands against the item store and audit log.
pub struct CorrectionResolver {
    store: ItemStore,
    audit: AuditLog,
    categories: Vec<CategoryConfig>,
    fix_pattern: Regex,
}

impl CorrectionResolver {
    pub fn new(
        store: ItemStore,
        audit: AuditLog,
        categories: Vec<CategoryConfig>,
        fix_pattern: Regex,
    ) -> Self {
        Self {
            store,
            audit,
            categories,
            fix_pattern,
        }
    }

    /// Resolve a pending fix command to its target item and new category.
    ///
    /// Does not mutate anything — applying the result is the router's job,
    /// and deleting the consumed fix command is the pipeline's.
    pub async fn resolve(
        &self,
        fix: &StoredItem,
    ) -> Result<(StoredItem, CategoryConfig), CorrectionError> {
        let target = match &fix.item.reply_to {
            // Thread correction: the reply names its target exactly.
            Some(reply_to) => self
                .store
                .find(reply_to)
                .await?
                .ok_or_else(|| CorrectionError::TargetNotFound {
                    reply_to: reply_to.clone(),
                })?,
            // Legacy prefix correction: target the most recent audit entry.
            None => {
                let entry = self
                    .audit
                    .last_entry()
                    .await?
                    .ok_or(CorrectionError::NoRecentItem)?;
                self.store
                    .find(&entry.source_id)
                    .await?
                    .ok_or(CorrectionError::TargetNotFound {
                        reply_to: entry.source_id,
                    })?
            }
        };

        // A correction can only retarget a capture; never another fix command.
        if target.item.kind != crate::item::ItemKind::Capture {
            return Err(CorrectionError::TargetNotFound {
                reply_to: target.item.source_id,
            });
        }

        let text = self.correction_text(&fix.item.body);
        let category = self
            .match_category(text)
            .ok_or_else(|| CorrectionError::UnknownCategory {
                input: text.to_string(),
            })?
            .clone();

        Ok((target, category))
    }

    /// The free text naming the new category: everything after the prefix,
    /// or the whole body for thread replies.
    fn correction_text<'a>(&self, body: &'a str) -> &'a str {
        self.fix_pattern
            .captures(body.trim())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(body)
            .trim()
    }

    /// Match correction text against the alias table.
    ///
    /// First-match-wins: categories in configured order, aliases in
    /// configured order, substring match on the lowercased text. "ideas or
    /// tasks" resolves to whichever category is configured first.
    pub fn match_category(&self, text: &str) -> Option<&CategoryConfig> {
        let text = text.to_lowercase();
        self.categories.iter().find(|cat| {
            cat.aliases
                .iter()
                .chain(std::iter::once(&cat.name))
                .any(|alias| text.contains(&alias.to_lowercase()))
        })
    }
}
