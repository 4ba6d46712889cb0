//! The append-only audit log: one markdown document, sections per day, one
//! table row per processed item.
//!
//! Rows are never rewritten except their Status column, which a correction
//! flips to `Fixed`. The trailing Ref column carries the item's source id so
//! a prefix correction ("fix: tasks") can resolve "the most recent entry"
//! back to a concrete item.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::StoreError;
use crate::store::write_atomic;

const LOG_TITLE: &str = "# Inbox Log";
const TABLE_HEADER: &str = "| Time | Note | Category | Destination | Status | Ref |";
const TABLE_RULE: &str = "| --- | --- | --- | --- | --- | --- |";

/// Outcome recorded for a processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Filed,
    NeedsReview,
    Fixed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filed => "Filed",
            Self::NeedsReview => "Needs Review",
            Self::Fixed => "Fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Filed" => Some(Self::Filed),
            "Needs Review" => Some(Self::NeedsReview),
            "Fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// One audit row.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub time: DateTime<Utc>,
    pub excerpt: String,
    pub category: String,
    pub destination: String,
    pub status: AuditStatus,
    pub source_id: String,
}

/// The audit log document.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append a row, creating the document and day section as needed.
    pub async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => format!("{LOG_TITLE}\n"),
            Err(e) => return Err(e.into()),
        };

        let day_heading = format!("## {}", entry.time.format("%Y-%m-%d"));
        if !content.lines().any(|l| l.trim() == day_heading) {
            content.push_str(&format!(
                "\n{day_heading}\n\n{TABLE_HEADER}\n{TABLE_RULE}\n"
            ));
        }

        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            entry.time.format("%H:%M"),
            cell(&entry.excerpt),
            cell(&entry.category),
            cell(&entry.destination),
            entry.status.as_str(),
            cell(&entry.source_id),
        ));

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.path, &content).await
    }

    /// The most recently appended row, if any.
    pub async fn last_entry(&self) -> Result<Option<AuditEntry>, StoreError> {
        Ok(self.read_entries().await?.into_iter().next_back())
    }

    /// Flip the Status column of the latest row for `source_id`.
    ///
    /// Returns false when no row references that item.
    pub async fn update_status(
        &self,
        source_id: &str,
        status: AuditStatus,
    ) -> Result<bool, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().collect();
        let target = lines.iter().rposition(|line| {
            parse_row(line)
                .map(|cells| cells.5 == source_id)
                .unwrap_or(false)
        });
        let Some(idx) = target else {
            return Ok(false);
        };
        let Some(cells) = parse_row(lines[idx]) else {
            return Ok(false);
        };
        let updated = format!(
            "| {} | {} | {} | {} | {} | {} |",
            cells.0,
            cells.1,
            cells.2,
            cells.3,
            status.as_str(),
            cells.5,
        );

        let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        out[idx] = updated;
        write_atomic(&self.path, &(out.join("\n") + "\n")).await?;
        Ok(true)
    }

    /// Parse all rows, oldest first.
    pub async fn read_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut current_day: Option<NaiveDate> = None;

        for line in content.lines() {
            if let Some(date) = line.trim().strip_prefix("## ") {
                current_day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok();
                continue;
            }
            let Some(cells) = parse_row(line) else {
                continue;
            };
            let Some(day) = current_day else { continue };
            let Ok(time) = NaiveTime::parse_from_str(cells.0, "%H:%M") else {
                continue;
            };
            let Some(status) = AuditStatus::parse(cells.4) else {
                continue;
            };
            entries.push(AuditEntry {
                time: day.and_time(time).and_utc(),
                excerpt: cells.1.to_string(),
                category: cells.2.to_string(),
                destination: cells.3.to_string(),
                status,
                source_id: cells.5.to_string(),
            });
        }

        Ok(entries)
    }
}

/// Sanitize a value for embedding in a table cell.
fn cell(value: &str) -> String {
    value.replace('|', "/").replace('\n', " ")
}

/// Split a data row into its six cells; None for non-row lines.
fn parse_row(line: &str) -> Option<(&str, &str, &str, &str, &str, &str)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') || trimmed.starts_with("| ---") || trimmed == TABLE_HEADER {
        return None;
    }
    let cells: Vec<&str> = trimmed
        .trim_matches('|')
        .split('|')
        .map(str::trim)
        .collect();
    if cells.len() != 6 || cells[0] == "Time" {
        return None;
    }
    Some((cells[0], cells[1], cells[2], cells[3], cells[4], cells[5]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, status: AuditStatus, hour: u32) -> AuditEntry {
        AuditEntry {
            time: Utc.with_ymd_and_hms(2026, 8, 7, hour, 15, 0).unwrap(),
            excerpt: "Call dentist about crown".into(),
            category: "tasks".into(),
            destination: "Tasks/Call dentist.md".into(),
            status,
            source_id: id.into(),
        }
    }

    fn log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("Inbox-Log.md"));
        (dir, log)
    }

    #[tokio::test]
    async fn append_creates_day_section_once() {
        let (_dir, log) = log();
        log.append(&entry("G1", AuditStatus::Filed, 8)).await.unwrap();
        log.append(&entry("G2", AuditStatus::Filed, 9)).await.unwrap();

        let content = tokio::fs::read_to_string(&log.path).await.unwrap();
        assert_eq!(content.matches("## 2026-08-07").count(), 1);
        assert_eq!(content.matches("| Time |").count(), 1);
        assert_eq!(log.read_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn last_entry_is_most_recent_append() {
        let (_dir, log) = log();
        assert!(log.last_entry().await.unwrap().is_none());

        log.append(&entry("G1", AuditStatus::Filed, 8)).await.unwrap();
        log.append(&entry("G2", AuditStatus::NeedsReview, 9))
            .await
            .unwrap();

        let last = log.last_entry().await.unwrap().unwrap();
        assert_eq!(last.source_id, "G2");
        assert_eq!(last.status, AuditStatus::NeedsReview);
    }

    #[tokio::test]
    async fn update_status_flips_only_target_row() {
        let (_dir, log) = log();
        log.append(&entry("G1", AuditStatus::Filed, 8)).await.unwrap();
        log.append(&entry("G2", AuditStatus::Filed, 9)).await.unwrap();

        assert!(log.update_status("G1", AuditStatus::Fixed).await.unwrap());

        let entries = log.read_entries().await.unwrap();
        assert_eq!(entries[0].status, AuditStatus::Fixed);
        assert_eq!(entries[1].status, AuditStatus::Filed);
    }

    #[tokio::test]
    async fn update_status_unknown_ref_is_false() {
        let (_dir, log) = log();
        log.append(&entry("G1", AuditStatus::Filed, 8)).await.unwrap();
        assert!(!log.update_status("G9", AuditStatus::Fixed).await.unwrap());
    }

    #[tokio::test]
    async fn pipe_in_excerpt_is_sanitized() {
        let (_dir, log) = log();
        let mut e = entry("G1", AuditStatus::Filed, 8);
        e.excerpt = "a | b".into();
        log.append(&e).await.unwrap();

        let read = log.last_entry().await.unwrap().unwrap();
        assert_eq!(read.excerpt, "a / b");
        assert_eq!(read.source_id, "G1");
    }
}
