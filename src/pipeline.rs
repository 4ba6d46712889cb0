//! The cycle: ingest → resolve corrections → classify and route → feedback.
//!
//! One `run_cycle()` is one non-overlapping invocation of the whole
//! pipeline. Every per-item failure is caught, logged, and converted into a
//! counter — one bad item never blocks the rest of the cycle, and anything
//! retryable is simply picked up again next time.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::capture::{CaptureOutcome, CaptureWriter};
use crate::classify::{ClassificationInvoker, Classifier};
use crate::config::Config;
use crate::correction::CorrectionResolver;
use crate::error::ConfigError;
use crate::notify::{Notifier, feedback_message};
use crate::router::{RouteOutcome, Router};
use crate::source::{CursorStore, MessageSource};
use crate::store::ItemStore;

/// Counters for one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub captured: usize,
    pub fixes_queued: usize,
    pub deduped: usize,
    pub corrections_applied: usize,
    pub corrections_discarded: usize,
    pub filed: usize,
    pub needs_review: usize,
    pub feedback_sent: usize,
    pub errors: usize,
}

/// The capture-and-routing pipeline.
pub struct Pipeline {
    source: Arc<dyn MessageSource>,
    store: ItemStore,
    cursor: CursorStore,
    capture: CaptureWriter,
    resolver: CorrectionResolver,
    invoker: ClassificationInvoker,
    router: Router,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

impl Pipeline {
    /// Wire the pipeline from config plus its three injected capabilities.
    pub fn new(
        config: Config,
        source: Arc<dyn MessageSource>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        let store = ItemStore::new(config.inbox_dir(), config.archive_dir());
        let audit = AuditLog::new(config.audit_path());
        let cursor = CursorStore::new(config.cursor_path());
        let fix_pattern = config.fix_pattern()?;

        let capture = CaptureWriter::new(store.clone(), cursor.clone(), fix_pattern.clone());
        let resolver = CorrectionResolver::new(
            store.clone(),
            audit.clone(),
            config.categories.clone(),
            fix_pattern,
        );
        let invoker = ClassificationInvoker::new(
            classifier,
            std::time::Duration::from_secs(config.classifier.timeout_secs),
            config.classifier.confidence_floor,
        );
        let router = Router::new(
            config.vault.clone(),
            store.clone(),
            audit,
            config.categories.clone(),
        );

        Ok(Self {
            source,
            store,
            cursor,
            capture,
            resolver,
            invoker,
            router,
            notifier,
            config,
        })
    }

    /// Run one full cycle. Never returns an error — failures are logged and
    /// counted, and whatever is retryable comes back next cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        if let Err(e) = self.store.ensure_dirs().await {
            error!(error = %e, "Cannot create store directories, skipping cycle");
            report.errors += 1;
            return report;
        }

        self.ingest(&mut report).await;
        self.resolve_corrections(&mut report).await;
        self.classify_and_route(&mut report).await;
        self.send_feedback(&mut report).await;

        info!(
            captured = report.captured,
            fixes_queued = report.fixes_queued,
            deduped = report.deduped,
            corrections_applied = report.corrections_applied,
            corrections_discarded = report.corrections_discarded,
            filed = report.filed,
            needs_review = report.needs_review,
            feedback_sent = report.feedback_sent,
            errors = report.errors,
            "Cycle complete"
        );
        report
    }

    // ── Step 1: ingest ──────────────────────────────────────────────

    async fn ingest(&self, report: &mut CycleReport) {
        let cursor = self.cursor.load().await;
        let messages = match self.source.poll(cursor).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Source unavailable, retrying next cycle");
                report.errors += 1;
                return;
            }
        };

        if messages.is_empty() {
            return;
        }
        debug!(count = messages.len(), "Ingesting new messages");

        for msg in &messages {
            match self.capture.capture(msg).await {
                Ok(CaptureOutcome::Captured(_)) => report.captured += 1,
                Ok(CaptureOutcome::FixQueued(_)) => report.fixes_queued += 1,
                Ok(CaptureOutcome::Deduped) => report.deduped += 1,
                Ok(CaptureOutcome::SkippedEmpty) => {}
                Err(e) => {
                    // Stop here: capturing later messages would advance the
                    // cursor past this one and lose it.
                    error!(source_id = %msg.source_id, error = %e, "Capture failed, stopping ingest");
                    report.errors += 1;
                    return;
                }
            }
        }
    }

    // ── Step 2: corrections ─────────────────────────────────────────

    async fn resolve_corrections(&self, report: &mut CycleReport) {
        let fixes = match self.store.list_pending_fixes().await {
            Ok(fixes) => fixes,
            Err(e) => {
                warn!(error = %e, "Cannot list pending fixes");
                report.errors += 1;
                return;
            }
        };

        for fix in fixes {
            match self.resolver.resolve(&fix).await {
                Ok((target, category)) => {
                    match self.router.apply_correction(&target, &category).await {
                        Ok(_) => {
                            // Consume the fix only after it fully applied.
                            if let Err(e) = self.store.remove(&fix.path).await {
                                warn!(path = %fix.path.display(), error = %e, "Could not delete consumed fix");
                            }
                            report.corrections_applied += 1;
                        }
                        Err(e) => {
                            warn!(
                                source_id = %fix.item.source_id,
                                error = %e,
                                "Correction apply failed, retrying next cycle"
                            );
                            report.errors += 1;
                        }
                    }
                }
                Err(e) => {
                    // Unresolvable: discard so it cannot corrupt state later.
                    warn!(
                        source_id = %fix.item.source_id,
                        error = %e,
                        "Discarding unresolvable correction"
                    );
                    if let Err(re) = self.store.remove(&fix.path).await {
                        warn!(path = %fix.path.display(), error = %re, "Could not delete discarded fix");
                    }
                    report.corrections_discarded += 1;
                }
            }
        }
    }

    // ── Step 3: classify and route ──────────────────────────────────

    async fn classify_and_route(&self, report: &mut CycleReport) {
        let items = match self.store.list_unprocessed().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Cannot list unprocessed items");
                report.errors += 1;
                return;
            }
        };

        // Precondition, not an optimization detail: zero pending items must
        // mean zero classifier calls.
        if items.is_empty() {
            debug!("No unprocessed items, skipping classifier");
            return;
        }

        for stored in items {
            let decision = match self
                .invoker
                .invoke(&stored.item, &self.config.categories)
                .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(
                        source_id = %stored.item.source_id,
                        error = %e,
                        "Classification failed, item stays unprocessed"
                    );
                    report.errors += 1;
                    continue;
                }
            };

            match self.router.apply(&stored, &decision).await {
                Ok(RouteOutcome::Filed { .. }) => report.filed += 1,
                Ok(RouteOutcome::NeedsReview) => report.needs_review += 1,
                Err(e) => {
                    warn!(
                        source_id = %stored.item.source_id,
                        error = %e,
                        "Routing failed, item stays unprocessed"
                    );
                    report.errors += 1;
                }
            }
        }
    }

    // ── Step 4: feedback ────────────────────────────────────────────

    async fn send_feedback(&self, report: &mut CycleReport) {
        if !self.config.feedback.enabled {
            return;
        }
        let Some(recipient) = self.config.feedback_recipient().map(String::from) else {
            debug!("No feedback recipient configured");
            return;
        };

        let items = match self.store.list_needs_feedback().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Cannot list needs-review items");
                report.errors += 1;
                return;
            }
        };

        let names: Vec<String> = self
            .config
            .categories
            .iter()
            .map(|c| c.name.clone())
            .collect();

        for stored in items {
            let message = feedback_message(&stored.item.source_id, &stored.item.body, &names);
            match self.notifier.notify(&recipient, &message).await {
                Ok(()) => {
                    let mut item = stored.item.clone();
                    item.feedback_sent_at = Some(Utc::now());
                    if let Err(e) = self.store.rewrite(&stored.path, &item).await {
                        warn!(path = %stored.path.display(), error = %e, "Could not mark feedback sent");
                    }
                    report.feedback_sent += 1;
                }
                Err(e) => {
                    // Fire-and-forget: log it, try again next cycle.
                    warn!(
                        source_id = %stored.item.source_id,
                        error = %e,
                        "Feedback send failed"
                    );
                    report.errors += 1;
                }
            }
        }
    }
}
