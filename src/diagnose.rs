//! Environment doctor: checks everything the pipeline needs before it runs.
//!
//! Read-only apart from a writability probe file that is removed afterward.

use crate::config::Config;
use crate::source::{ChatDbSource, Cursor, CursorStore, MessageSource};
use crate::store::ItemStore;

fn ok(msg: &str) {
    println!("[ok]   {msg}");
}

fn warn(msg: &str) {
    println!("[warn] {msg}");
}

fn fail(msg: &str) {
    println!("[fail] {msg}");
}

/// Run all checks. Returns true when every required check passed.
pub async fn run(config: &Config) -> bool {
    let mut passed = true;

    // Config.
    match config.validate() {
        Ok(()) => ok(&format!(
            "config valid ({} categories, {} handle(s))",
            config.categories.len(),
            config.handles.len()
        )),
        Err(e) => {
            fail(&format!("config invalid: {e}"));
            passed = false;
        }
    }

    // Vault writability.
    let store = ItemStore::new(config.inbox_dir(), config.archive_dir());
    match store.ensure_dirs().await {
        Ok(()) => {
            let probe = config.inbox_dir().join(".probe");
            match tokio::fs::write(&probe, "probe").await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&probe).await;
                    ok(&format!("vault writable at {}", config.vault.display()));
                }
                Err(e) => {
                    fail(&format!("inbox not writable: {e}"));
                    passed = false;
                }
            }
        }
        Err(e) => {
            fail(&format!("cannot create vault directories: {e}"));
            passed = false;
        }
    }

    // Message source. Poll far past the end of the log: exercises open and
    // query without ingesting anything.
    let source = ChatDbSource::new(&config.message_db, config.handles.clone());
    match source.poll(Some(Cursor(i64::MAX))).await {
        Ok(_) => ok(&format!(
            "message database readable at {}",
            config.message_db.display()
        )),
        Err(e) => {
            fail(&format!(
                "message database unreadable: {e} \
                 (grant Full Disk Access to the invoking process)"
            ));
            passed = false;
        }
    }

    // Cursor.
    let cursor = CursorStore::new(config.cursor_path());
    match cursor.load().await {
        Some(Cursor(pos)) => ok(&format!("cursor at position {pos}")),
        None => warn("no cursor yet; first run ingests only the last hour"),
    }

    // Pending work.
    match store.list_unprocessed().await {
        Ok(items) => ok(&format!("{} unprocessed item(s) pending", items.len())),
        Err(e) => {
            warn(&format!("cannot scan inbox: {e}"));
        }
    }
    if let Ok(fixes) = store.list_pending_fixes().await
        && !fixes.is_empty()
    {
        warn(&format!("{} unresolved fix command(s)", fixes.len()));
    }
    if let Ok(waiting) = store.list_needs_feedback().await
        && !waiting.is_empty()
    {
        warn(&format!("{} item(s) awaiting a feedback nudge", waiting.len()));
    }

    passed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn diagnose_fails_without_message_db() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            vault: dir.path().join("vault"),
            state_dir: dir.path().join("state"),
            message_db: dir.path().join("missing/chat.db"),
            handles: vec!["+1555".into()],
            ..Config::default()
        };
        assert!(!run(&config).await);
    }
}
