//! The classification capability boundary.
//!
//! The decision itself is a black box behind the `Classifier` trait; the
//! core only owns the contract around it: bounded-time invocation, at most
//! one call per item per cycle, unknown or low-confidence output degrading
//! to needs-review, and skip-on-empty enforced by the cycle loop.

pub mod llm;

pub use llm::LlmClassifier;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::CategoryConfig;
use crate::error::ClassifyError;
use crate::item::Item;

/// A classification decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// File under this category.
    Category { name: String, confidence: f32 },
    /// Could not decide; leave for a human correction.
    NeedsReview { reason: String },
}

/// The injected classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        item: &Item,
        categories: &[CategoryConfig],
    ) -> Result<Decision, ClassifyError>;
}

/// Wraps the classifier with the invocation policy the pipeline relies on.
pub struct ClassificationInvoker {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    confidence_floor: f32,
}

impl ClassificationInvoker {
    pub fn new(classifier: Arc<dyn Classifier>, timeout: Duration, confidence_floor: f32) -> Self {
        Self {
            classifier,
            timeout,
            confidence_floor,
        }
    }

    /// Invoke the classifier once for one item, bounded in time.
    ///
    /// The returned decision is safe to apply: a category name not in the
    /// table or a confidence below the floor has already been degraded to
    /// `NeedsReview`. Errors leave the item untouched for the next cycle.
    pub async fn invoke(
        &self,
        item: &Item,
        categories: &[CategoryConfig],
    ) -> Result<Decision, ClassifyError> {
        let decision = tokio::time::timeout(self.timeout, self.classifier.classify(item, categories))
            .await
            .map_err(|_| ClassifyError::Timeout {
                timeout: self.timeout,
            })??;

        Ok(match decision {
            Decision::Category { name, confidence } => {
                if !categories.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
                    warn!(
                        source_id = %item.source_id,
                        category = %name,
                        "Classifier returned unknown category, degrading to needs_review"
                    );
                    Decision::NeedsReview {
                        reason: format!("unknown category: {name}"),
                    }
                } else if confidence < self.confidence_floor {
                    Decision::NeedsReview {
                        reason: format!("low confidence: {confidence:.2}"),
                    }
                } else {
                    Decision::Category { name, confidence }
                }
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::source::RawMessage;
    use chrono::Utc;

    struct FixedClassifier(Decision);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            _item: &Item,
            _categories: &[CategoryConfig],
        ) -> Result<Decision, ClassifyError> {
            Ok(self.0.clone())
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        async fn classify(
            &self,
            _item: &Item,
            _categories: &[CategoryConfig],
        ) -> Result<Decision, ClassifyError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Decision::NeedsReview {
                reason: "too late".into(),
            })
        }
    }

    fn item() -> Item {
        Item::new_capture(&RawMessage {
            source_id: "G1".into(),
            sender: "+1555".into(),
            text: "buy milk".into(),
            position: 1,
            timestamp: Utc::now(),
            reply_to_id: None,
        })
    }

    fn invoker(decision: Decision) -> ClassificationInvoker {
        ClassificationInvoker::new(
            Arc::new(FixedClassifier(decision)),
            Duration::from_secs(5),
            0.5,
        )
    }

    #[tokio::test]
    async fn valid_category_passes_through() {
        let inv = invoker(Decision::Category {
            name: "tasks".into(),
            confidence: 0.9,
        });
        let decision = inv
            .invoke(&item(), &Config::default_categories())
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Category {
                name: "tasks".into(),
                confidence: 0.9
            }
        );
    }

    #[tokio::test]
    async fn unknown_category_degrades_to_needs_review() {
        let inv = invoker(Decision::Category {
            name: "recipes".into(),
            confidence: 0.9,
        });
        let decision = inv
            .invoke(&item(), &Config::default_categories())
            .await
            .unwrap();
        assert!(matches!(decision, Decision::NeedsReview { .. }));
    }

    #[tokio::test]
    async fn low_confidence_degrades_to_needs_review() {
        let inv = invoker(Decision::Category {
            name: "tasks".into(),
            confidence: 0.2,
        });
        let decision = inv
            .invoke(&item(), &Config::default_categories())
            .await
            .unwrap();
        assert!(matches!(decision, Decision::NeedsReview { .. }));
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let inv = ClassificationInvoker::new(
            Arc::new(SlowClassifier),
            Duration::from_millis(50),
            0.5,
        );
        let err = inv
            .invoke(&item(), &Config::default_categories())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Timeout { .. }));
    }
}
