//! The captured item: model, lifecycle states, and on-disk document format.
//!
//! An item is a text document with a key/value header between `---` markers
//! followed by the free-text body:
//!
//! ```text
//! ---
//! captured: 2026-01-15T08:30:00+00:00
//! source: imessage
//! source_id: 6F9619FF-8B86-D011-B42D-00CF4FC964FF
//! kind: capture
//! state: unprocessed
//! processed: false
//! ---
//!
//! Sarah prefers window seats
//! ```
//!
//! Filing flips `processed` and adds `category`, `destination`, and
//! `classified_at`.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::source::RawMessage;

/// Lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Captured, awaiting classification.
    Unprocessed,
    /// Classifier could not decide; awaiting a correction.
    NeedsReview,
    /// Classified and moved to its destination.
    Filed,
    /// Retargeted by a correction.
    Fixed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::NeedsReview => "needs_review",
            Self::Filed => "filed",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unprocessed" => Some(Self::Unprocessed),
            "needs_review" => Some(Self::NeedsReview),
            "filed" => Some(Self::Filed),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }

    /// Whether `self → to` is a legal transition.
    ///
    /// States advance monotonically; the only re-entry is a correction
    /// lifting `needs_review` or `filed` into `fixed`.
    pub fn can_transition(&self, to: ItemState) -> bool {
        matches!(
            (self, to),
            (Self::Unprocessed, Self::Filed)
                | (Self::Unprocessed, Self::NeedsReview)
                | (Self::Unprocessed, Self::Fixed)
                | (Self::NeedsReview, Self::Fixed)
                | (Self::Filed, Self::Fixed)
                | (Self::Fixed, Self::Fixed)
        )
    }
}

/// What kind of document an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A note to be classified and filed.
    Capture,
    /// A correction command; consumed, never filed.
    FixCommand,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::FixCommand => "fix_command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capture" => Some(Self::Capture),
            "fix_command" => Some(Self::FixCommand),
            _ => None,
        }
    }
}

/// A captured unit of text moving through the filing lifecycle.
#[derive(Debug, Clone)]
pub struct Item {
    /// Globally unique source message id.
    pub source_id: String,
    /// Where the message came from (e.g. "imessage").
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub kind: ItemKind,
    pub state: ItemState,
    /// Id of the message this one replies to; set only on corrections.
    pub reply_to: Option<String>,
    /// Assigned category, once classified.
    pub category: Option<String>,
    /// Destination path relative to the vault root, once filed.
    pub destination: Option<String>,
    pub classified_at: Option<DateTime<Utc>>,
    /// When the needs-review nudge went out, if it did.
    pub feedback_sent_at: Option<DateTime<Utc>>,
    pub body: String,
}

impl Item {
    /// Build a fresh capture item from a raw message.
    pub fn new_capture(msg: &RawMessage) -> Self {
        Self {
            source_id: msg.source_id.clone(),
            source: "imessage".into(),
            captured_at: msg.timestamp,
            kind: ItemKind::Capture,
            state: ItemState::Unprocessed,
            reply_to: None,
            category: None,
            destination: None,
            classified_at: None,
            feedback_sent_at: None,
            body: msg.text.trim().to_string(),
        }
    }

    /// Build a fix-command item from a raw message.
    pub fn new_fix(msg: &RawMessage) -> Self {
        Self {
            kind: ItemKind::FixCommand,
            reply_to: msg.reply_to_id.clone(),
            ..Self::new_capture(msg)
        }
    }

    /// Whether the item is a capture still waiting on the classifier.
    pub fn is_unprocessed_capture(&self) -> bool {
        self.kind == ItemKind::Capture && self.state == ItemState::Unprocessed
    }

    /// First line of the body, truncated to `max` chars, single-line.
    pub fn excerpt(&self, max: usize) -> String {
        let line = self.body.replace('\n', " ");
        let line = line.trim();
        let mut out: String = line.chars().take(max).collect();
        if line.chars().count() > max {
            out.push_str("...");
        }
        out
    }

    // ── Document format ─────────────────────────────────────────────

    /// Serialize to the on-disk document.
    pub fn to_document(&self) -> String {
        let mut doc = String::with_capacity(self.body.len() + 256);
        doc.push_str("---\n");
        doc.push_str(&format!("captured: {}\n", self.captured_at.to_rfc3339()));
        doc.push_str(&format!("source: {}\n", self.source));
        doc.push_str(&format!("source_id: {}\n", self.source_id));
        doc.push_str(&format!("kind: {}\n", self.kind.as_str()));
        doc.push_str(&format!("state: {}\n", self.state.as_str()));
        doc.push_str(&format!(
            "processed: {}\n",
            matches!(self.state, ItemState::Filed | ItemState::Fixed)
        ));
        if let Some(reply_to) = &self.reply_to {
            doc.push_str(&format!("reply_to: {reply_to}\n"));
        }
        if let Some(category) = &self.category {
            doc.push_str(&format!("category: {category}\n"));
        }
        if let Some(destination) = &self.destination {
            doc.push_str(&format!("destination: {destination}\n"));
        }
        if let Some(at) = &self.classified_at {
            doc.push_str(&format!("classified_at: {}\n", at.to_rfc3339()));
        }
        if let Some(at) = &self.feedback_sent_at {
            doc.push_str(&format!("feedback_sent_at: {}\n", at.to_rfc3339()));
        }
        doc.push_str("---\n\n");
        doc.push_str(&self.body);
        doc.push('\n');
        doc
    }

    /// Parse an on-disk document back into an item.
    pub fn parse_document(path: &str, content: &str) -> Result<Self, StoreError> {
        let malformed = |reason: &str| StoreError::Malformed {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let rest = content
            .strip_prefix("---\n")
            .ok_or_else(|| malformed("missing header opening marker"))?;
        let (header, body) = rest
            .split_once("\n---")
            .ok_or_else(|| malformed("missing header closing marker"))?;

        let mut source_id = None;
        let mut source = None;
        let mut captured_at = None;
        let mut kind = ItemKind::Capture;
        let mut state = ItemState::Unprocessed;
        let mut reply_to = None;
        let mut category = None;
        let mut destination = None;
        let mut classified_at = None;
        let mut feedback_sent_at = None;

        for line in header.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "source_id" => source_id = Some(value.to_string()),
                "source" => source = Some(value.to_string()),
                "captured" => {
                    captured_at = Some(
                        DateTime::parse_from_rfc3339(value)
                            .map_err(|e| malformed(&format!("bad captured timestamp: {e}")))?
                            .with_timezone(&Utc),
                    );
                }
                "kind" => {
                    kind = ItemKind::parse(value)
                        .ok_or_else(|| malformed(&format!("unknown kind: {value}")))?;
                }
                "state" => {
                    state = ItemState::parse(value)
                        .ok_or_else(|| malformed(&format!("unknown state: {value}")))?;
                }
                "reply_to" => reply_to = Some(value.to_string()),
                "category" => category = Some(value.to_string()),
                "destination" => destination = Some(value.to_string()),
                "classified_at" => {
                    classified_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc));
                }
                "feedback_sent_at" => {
                    feedback_sent_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc));
                }
                _ => {}
            }
        }

        Ok(Self {
            source_id: source_id.ok_or_else(|| malformed("missing source_id"))?,
            source: source.unwrap_or_else(|| "imessage".into()),
            captured_at: captured_at.ok_or_else(|| malformed("missing captured timestamp"))?,
            kind,
            state,
            reply_to,
            category,
            destination,
            classified_at,
            feedback_sent_at,
            body: body.trim_start_matches('\n').trim().to_string(),
        })
    }
}

/// Create a safe filename snippet from message text.
pub fn sanitize_filename(text: &str, max_length: usize) -> String {
    let snippet = text.lines().next().unwrap_or("").trim();
    let safe: String = snippet
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let safe: String = safe.trim().chars().take(max_length).collect();
    let safe = safe.trim().to_string();
    if safe.is_empty() { "capture".into() } else { safe }
}
