//! Outbound notification channel.
//!
//! The pipeline treats this as fire-and-forget: a failed send is logged and
//! the item is retried next cycle, never fatal. Every send is bounded in
//! time.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;

/// Max preview characters in a feedback message.
const PREVIEW_CHARS: usize = 50;

/// Outbound send capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &str, text: &str) -> Result<(), NotifyError>;
}

/// Build the needs-review nudge for an item.
///
/// Carries the source id so a reply to this message can be thread-correlated
/// back to the item it asks about.
pub fn feedback_message(source_id: &str, body: &str, category_names: &[String]) -> String {
    let flat = body.replace('\n', " ");
    let flat = flat.trim();
    let mut preview: String = flat.chars().take(PREVIEW_CHARS).collect();
    if flat.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!(
        "[note:{source_id}] Unclear: \"{preview}\". Reply: {}",
        category_names.join("/")
    )
}

/// Sends over iMessage via osascript. macOS only; requires automation
/// permission for Messages.
pub struct OsaScriptNotifier {
    timeout: Duration,
}

impl OsaScriptNotifier {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for OsaScriptNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for OsaScriptNotifier {
    async fn notify(&self, target: &str, text: &str) -> Result<(), NotifyError> {
        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        let recipient = target.replace('\\', "\\\\").replace('"', "\\\"");
        let script = format!(
            "tell application \"Messages\"\n\
             activate\n\
             delay 1\n\
             set targetService to id of 1st account whose service type = iMessage\n\
             set targetBuddy to participant \"{recipient}\" of account id targetService\n\
             send \"{escaped}\" to targetBuddy\n\
             end tell"
        );

        let run = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| NotifyError::Timeout {
                timeout: self.timeout,
            })?
            .map_err(|e| NotifyError::SendFailed {
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(NotifyError::SendFailed {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Logs instead of sending. Default off macOS and in tests.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, target: &str, text: &str) -> Result<(), NotifyError> {
        info!(target = %target, text = %text, "Notification (log only)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_message_format() {
        let msg = feedback_message(
            "G1",
            "some ambiguous thing I jotted down",
            &["tasks".into(), "people".into()],
        );
        assert_eq!(
            msg,
            "[note:G1] Unclear: \"some ambiguous thing I jotted down\". Reply: tasks/people"
        );
    }

    #[test]
    fn feedback_message_truncates_and_flattens() {
        let long = "line one\n".repeat(20);
        let msg = feedback_message("G1", &long, &["tasks".into()]);
        assert!(msg.contains("..."));
        assert!(!msg.contains('\n'));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier.notify("+1555", "hello").await.unwrap();
    }
}
