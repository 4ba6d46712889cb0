//! In-memory message source for tests and demos.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SourceError;
use crate::source::{Cursor, MessageSource, RawMessage};

/// A fake append-only message log held in memory.
///
/// Push messages in, poll them back out through the same contract the real
/// adapter honors: handle-filtered, strictly after the cursor, position
/// ascending.
#[derive(Clone)]
pub struct MemorySource {
    handles: Vec<String>,
    messages: Arc<Mutex<Vec<RawMessage>>>,
    /// When set, every poll fails — for exercising the retry path.
    unavailable: Arc<Mutex<bool>>,
}

impl MemorySource {
    pub fn new(handles: Vec<String>) -> Self {
        Self {
            handles,
            messages: Arc::new(Mutex::new(Vec::new())),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    /// Append a message to the fake log.
    pub async fn push(&self, msg: RawMessage) {
        self.messages.lock().await.push(msg);
    }

    /// Toggle the unavailable failure mode.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn poll(&self, cursor: Option<Cursor>) -> Result<Vec<RawMessage>, SourceError> {
        if *self.unavailable.lock().await {
            return Err(SourceError::Unavailable {
                path: "<memory>".into(),
                reason: "simulated outage".into(),
            });
        }

        let since = cursor.map(|c| c.0).unwrap_or(i64::MIN);
        let mut out: Vec<RawMessage> = self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.position > since)
            .filter(|m| self.handles.iter().any(|h| h == &m.sender))
            .filter(|m| !m.text.trim().is_empty())
            .cloned()
            .collect();
        out.sort_by_key(|m| m.position);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: &str, sender: &str, position: i64) -> RawMessage {
        RawMessage {
            source_id: id.into(),
            sender: sender.into(),
            text: format!("note {id}"),
            position,
            timestamp: Utc::now(),
            reply_to_id: None,
        }
    }

    #[tokio::test]
    async fn poll_filters_by_handle_and_cursor() {
        let source = MemorySource::new(vec!["+1555".into()]);
        source.push(msg("a", "+1555", 10)).await;
        source.push(msg("b", "someone-else", 20)).await;
        source.push(msg("c", "+1555", 30)).await;

        let all = source.poll(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let after = source.poll(Some(Cursor(10))).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].source_id, "c");
    }

    #[tokio::test]
    async fn poll_orders_by_position() {
        let source = MemorySource::new(vec!["+1555".into()]);
        source.push(msg("late", "+1555", 30)).await;
        source.push(msg("early", "+1555", 10)).await;

        let out = source.poll(None).await.unwrap();
        assert_eq!(out[0].source_id, "early");
        assert_eq!(out[1].source_id, "late");
    }

    #[tokio::test]
    async fn poll_is_repeatable() {
        let source = MemorySource::new(vec!["+1555".into()]);
        source.push(msg("a", "+1555", 10)).await;

        let first = source.poll(None).await.unwrap();
        let second = source.poll(None).await.unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn poll_skips_blank_text() {
        let source = MemorySource::new(vec!["+1555".into()]);
        let mut blank = msg("a", "+1555", 10);
        blank.text = "   ".into();
        source.push(blank).await;

        assert!(source.poll(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_source_errors() {
        let source = MemorySource::new(vec!["+1555".into()]);
        source.set_unavailable(true).await;
        assert!(matches!(
            source.poll(None).await,
            Err(SourceError::Unavailable { .. })
        ));
    }
}
