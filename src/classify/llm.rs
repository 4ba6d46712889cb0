//! LLM-backed classifier via rig-core.
//!
//! Builds a tight prompt from the category table, requests a JSON decision,
//! and parses it tolerating markdown wrapping. Anything the parser cannot
//! make sense of is an `InvalidResponse` — the item stays unprocessed and is
//! retried on a later cycle rather than being filed on a guess.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::classify::{Classifier, Decision};
use crate::config::CategoryConfig;
use crate::error::ClassifyError;
use crate::item::Item;

/// Sentinel the model returns when no category fits.
const NEEDS_REVIEW: &str = "needs_review";

/// Max note characters handed to the model.
const NOTE_PREVIEW_CHARS: usize = 1000;

/// Classifier backed by an Anthropic model through rig-core.
pub struct LlmClassifier {
    client: rig::client::Client<rig::providers::anthropic::client::AnthropicExt>,
    model: String,
}

impl LlmClassifier {
    pub fn new(api_key: &SecretString, model: &str) -> Result<Self, ClassifyError> {
        use rig::providers::anthropic;

        let client: rig::client::Client<anthropic::client::AnthropicExt> =
            anthropic::Client::new(api_key.expose_secret()).map_err(|e| {
                ClassifyError::Unavailable {
                    reason: format!("failed to create Anthropic client: {e}"),
                }
            })?;

        tracing::info!(model = %model, "Using Anthropic classifier");
        Ok(Self {
            client,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        item: &Item,
        categories: &[CategoryConfig],
    ) -> Result<Decision, ClassifyError> {
        use rig::client::CompletionClient;
        use rig::completion::Prompt;

        let agent = self
            .client
            .agent(&self.model)
            .preamble(&build_system_prompt(categories))
            .build();

        let raw = agent
            .prompt(build_user_prompt(item))
            .await
            .map_err(|e| ClassifyError::Unavailable {
                reason: e.to_string(),
            })?;

        parse_decision(&raw)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt(categories: &[CategoryConfig]) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(
        "You are a note filing engine. Assign the note to exactly one category.\n\nCategories:\n",
    );
    for cat in categories {
        prompt.push_str(&format!("- {}: {}\n", cat.name, cat.description));
    }
    prompt.push_str(&format!(
        "\nRespond with ONLY a JSON object:\n\
         {{\"category\": \"...\", \"confidence\": 0.0, \"reason\": \"...\"}}\n\n\
         Rules:\n\
         - \"category\" must be one of the names above, or \"{NEEDS_REVIEW}\" when none fits\n\
         - \"confidence\" is 0.0-1.0; high (>0.8) only when the fit is obvious\n\
         - When torn between two categories, use \"{NEEDS_REVIEW}\"\n\
         - Keep \"reason\" to one short sentence"
    ));
    prompt
}

fn build_user_prompt(item: &Item) -> String {
    let preview: String = item.body.chars().take(NOTE_PREVIEW_CHARS).collect();
    format!(
        "Captured: {}\n\nNote:\n{preview}",
        item.captured_at.to_rfc3339()
    )
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct DecisionResponse {
    category: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reason: String,
}

/// Parse the model's response into a `Decision`.
pub fn parse_decision(raw: &str) -> Result<Decision, ClassifyError> {
    let json = extract_json_object(raw);
    let response: DecisionResponse =
        serde_json::from_str(&json).map_err(|e| ClassifyError::InvalidResponse {
            reason: format!("JSON parse error: {e}"),
        })?;

    if response.category.trim().is_empty() {
        return Err(ClassifyError::InvalidResponse {
            reason: "empty category".into(),
        });
    }

    if response.category.eq_ignore_ascii_case(NEEDS_REVIEW) {
        Ok(Decision::NeedsReview {
            reason: if response.reason.is_empty() {
                "classifier declined".into()
            } else {
                response.reason
            },
        })
    } else {
        Ok(Decision::Category {
            name: response.category.to_lowercase(),
            confidence: response.confidence.clamp(0.0, 1.0),
        })
    }
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::source::RawMessage;
    use chrono::Utc;

    #[test]
    fn system_prompt_lists_every_category() {
        let prompt = build_system_prompt(&Config::default_categories());
        assert!(prompt.contains("- people:"));
        assert!(prompt.contains("- projects:"));
        assert!(prompt.contains("- ideas:"));
        assert!(prompt.contains("- tasks:"));
        assert!(prompt.contains(NEEDS_REVIEW));
    }

    #[test]
    fn user_prompt_truncates_long_notes() {
        let item = Item::new_capture(&RawMessage {
            source_id: "G1".into(),
            sender: "+1555".into(),
            text: "x".repeat(5000),
            position: 1,
            timestamp: Utc::now(),
            reply_to_id: None,
        });
        let prompt = build_user_prompt(&item);
        assert!(prompt.len() < 1200);
    }

    #[test]
    fn parse_category_decision() {
        let raw = r#"{"category": "tasks", "confidence": 0.92, "reason": "clearly a todo"}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(
            decision,
            Decision::Category {
                name: "tasks".into(),
                confidence: 0.92
            }
        );
    }

    #[test]
    fn parse_needs_review_decision() {
        let raw = r#"{"category": "needs_review", "reason": "could be a person or a task"}"#;
        let decision = parse_decision(raw).unwrap();
        assert!(matches!(decision, Decision::NeedsReview { .. }));
    }

    #[test]
    fn parse_normalizes_category_case() {
        let raw = r#"{"category": "Tasks", "confidence": 0.8}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(
            decision,
            Decision::Category {
                name: "tasks".into(),
                confidence: 0.8
            }
        );
    }

    #[test]
    fn parse_clamps_confidence() {
        let raw = r#"{"category": "ideas", "confidence": 1.7}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(
            decision,
            Decision::Category {
                name: "ideas".into(),
                confidence: 1.0
            }
        );
    }

    #[test]
    fn parse_handles_markdown_wrapping() {
        let raw = "Here you go:\n```json\n{\"category\": \"people\", \"confidence\": 0.9}\n```";
        let decision = parse_decision(raw).unwrap();
        assert!(matches!(decision, Decision::Category { .. }));
    }

    #[test]
    fn parse_handles_surrounding_text() {
        let raw = "I think {\"category\": \"ideas\", \"confidence\": 0.7} fits best.";
        let decision = parse_decision(raw).unwrap();
        assert!(matches!(decision, Decision::Category { .. }));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_decision("not json at all").is_err());
        assert!(parse_decision(r#"{"confidence": 0.9}"#).is_err());
    }
}
