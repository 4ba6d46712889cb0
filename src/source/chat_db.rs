//! Message log adapter over the macOS Messages database.
//!
//! Reads `chat.db` (SQLite format) through libsql. The database belongs to
//! the OS — this adapter only ever SELECTs, opening a fresh connection per
//! poll so a missing-permission failure surfaces as `SourceUnavailable`
//! every cycle until access is granted.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::source::{Cursor, MessageSource, RawMessage};

/// Apple's epoch starts at 2001-01-01; message dates are nanoseconds since.
const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// First-run lookback when no cursor exists, to avoid ingesting history.
const DEFAULT_LOOKBACK: Duration = Duration::from_secs(3600);

/// Convert an Apple nanosecond timestamp to a UTC datetime.
pub fn apple_ns_to_datetime(apple_ns: i64) -> DateTime<Utc> {
    let secs = apple_ns / 1_000_000_000 + APPLE_EPOCH_OFFSET;
    let nanos = (apple_ns % 1_000_000_000).unsigned_abs() as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}

/// Convert a UTC datetime to an Apple nanosecond timestamp.
pub fn datetime_to_apple_ns(dt: DateTime<Utc>) -> i64 {
    (dt.timestamp() - APPLE_EPOCH_OFFSET) * 1_000_000_000
}

/// Read-only poller over the Messages chat database.
pub struct ChatDbSource {
    db_path: PathBuf,
    handles: Vec<String>,
    lookback: Duration,
}

impl ChatDbSource {
    pub fn new(db_path: impl Into<PathBuf>, handles: Vec<String>) -> Self {
        Self {
            db_path: db_path.into(),
            handles,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    /// Override the first-run lookback window.
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    fn unavailable(&self, reason: impl ToString) -> SourceError {
        SourceError::Unavailable {
            path: self.db_path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn connect(&self) -> Result<libsql::Connection, SourceError> {
        if !self.db_path.exists() {
            return Err(self.unavailable("database file not found"));
        }
        let db = libsql::Builder::new_local(&self.db_path)
            .build()
            .await
            .map_err(|e| self.unavailable(e))?;
        db.connect().map_err(|e| self.unavailable(e))
    }
}

#[async_trait]
impl MessageSource for ChatDbSource {
    async fn poll(&self, cursor: Option<Cursor>) -> Result<Vec<RawMessage>, SourceError> {
        let conn = self.connect().await?;

        let since = match cursor {
            Some(Cursor(pos)) => pos,
            None => {
                let lookback = chrono::Duration::from_std(self.lookback)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                datetime_to_apple_ns(Utc::now() - lookback)
            }
        };

        let placeholders = vec!["?"; self.handles.len()].join(",");
        let sql = format!(
            "SELECT m.guid, m.date, m.text, c.chat_identifier, m.thread_originator_guid \
             FROM message m \
             JOIN chat_message_join cmj ON m.ROWID = cmj.message_id \
             JOIN chat c ON cmj.chat_id = c.ROWID \
             WHERE c.chat_identifier IN ({placeholders}) \
               AND m.date > ? \
               AND m.text IS NOT NULL \
               AND m.text != '' \
             ORDER BY m.date ASC"
        );

        let mut params: Vec<libsql::Value> = self
            .handles
            .iter()
            .map(|h| libsql::Value::Text(h.clone()))
            .collect();
        params.push(libsql::Value::Integer(since));

        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?
        {
            let guid: String = row
                .get::<String>(0)
                .map_err(|e| SourceError::Query(e.to_string()))?;
            let date: i64 = row
                .get::<i64>(1)
                .map_err(|e| SourceError::Query(e.to_string()))?;
            let text: String = row
                .get::<String>(2)
                .map_err(|e| SourceError::Query(e.to_string()))?;
            let sender: String = row
                .get::<String>(3)
                .map_err(|e| SourceError::Query(e.to_string()))?;
            let reply_to_id = match row.get_value(4) {
                Ok(libsql::Value::Text(s)) if !s.is_empty() => Some(s),
                _ => None,
            };

            messages.push(RawMessage {
                source_id: guid,
                sender,
                text,
                position: date,
                timestamp: apple_ns_to_datetime(date),
                reply_to_id,
            });
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_timestamp_round_trip() {
        let dt = DateTime::parse_from_rfc3339("2026-01-15T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let ns = datetime_to_apple_ns(dt);
        assert_eq!(apple_ns_to_datetime(ns), dt);
    }

    #[test]
    fn apple_epoch_is_2001() {
        let dt = apple_ns_to_datetime(0);
        assert_eq!(dt.to_rfc3339(), "2001-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn missing_database_is_unavailable() {
        let source = ChatDbSource::new("/nonexistent/chat.db", vec!["+1555".into()]);
        assert!(matches!(
            source.poll(None).await,
            Err(SourceError::Unavailable { .. })
        ));
    }
}
