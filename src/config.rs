//! Configuration types and loading.
//!
//! A base JSON config file with an optional `<name>.local.json` override
//! deep-merged on top. `Config::default()` carries the standard four-category
//! table so the pipeline is usable without any file at all.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the router derives destination file names for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    /// One note file per derived person name; repeat captures append.
    Person,
    /// One folder per derived name, created lazily; one file per capture.
    Hierarchy,
    /// One file per capture directly under the category folder.
    #[default]
    Flat,
}

/// A single classification category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Canonical category name, as the classifier must return it.
    pub name: String,
    /// Destination folder, relative to the vault root.
    pub destination: String,
    /// Human-readable description handed to the classifier.
    pub description: String,
    /// Keywords that map correction free-text to this category.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub kind: CategoryKind,
}

/// Outbound feedback settings for needs-review items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Recipient handle; defaults to the first configured self handle.
    #[serde(default)]
    pub recipient: Option<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recipient: None,
        }
    }
}

/// Classifier invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Hard bound on a single classification call.
    #[serde(default = "default_classify_timeout")]
    pub timeout_secs: u64,
    /// Decisions below this confidence degrade to needs_review.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_classify_timeout(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vault root; all destinations and the audit log live under it.
    #[serde(default = "default_vault")]
    pub vault: PathBuf,
    /// Inbox folder for pending items, relative to the vault.
    #[serde(default = "default_inbox")]
    pub inbox: String,
    /// Archive folder for filed item sources, relative to the vault.
    #[serde(default = "default_archive")]
    pub archive: String,
    /// Audit log document, relative to the vault.
    #[serde(default = "default_audit_log")]
    pub audit_log: String,
    /// Directory holding the ingestion cursor.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Path to the external message log database.
    #[serde(default = "default_message_db")]
    pub message_db: PathBuf,
    /// Self identities whose messages are captured.
    #[serde(default)]
    pub handles: Vec<String>,
    /// Correction prefix pattern, matched case-insensitively. Group 1 is the
    /// correction free-text.
    #[serde(default = "default_fix_prefix")]
    pub fix_prefix: String,
    #[serde(default = "Config::default_categories")]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Cycle interval for daemon mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_classify_timeout() -> u64 {
    60
}

fn default_confidence_floor() -> f32 {
    0.5
}

fn default_vault() -> PathBuf {
    expand_home("~/Notes")
}

fn default_inbox() -> String {
    "Inbox".to_string()
}

fn default_archive() -> String {
    "Archive".to_string()
}

fn default_audit_log() -> String {
    "Inbox-Log.md".to_string()
}

fn default_state_dir() -> PathBuf {
    expand_home("~/.note-assist")
}

fn default_message_db() -> PathBuf {
    expand_home("~/Library/Messages/chat.db")
}

fn default_fix_prefix() -> String {
    r"^fix:\s*(.+)".to_string()
}

fn default_poll_interval() -> u64 {
    300
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault: default_vault(),
            inbox: default_inbox(),
            archive: default_archive(),
            audit_log: default_audit_log(),
            state_dir: default_state_dir(),
            message_db: default_message_db(),
            handles: Vec::new(),
            fix_prefix: default_fix_prefix(),
            categories: Self::default_categories(),
            feedback: FeedbackConfig::default(),
            classifier: ClassifierConfig::default(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Config {
    /// The standard four-category table.
    pub fn default_categories() -> Vec<CategoryConfig> {
        vec![
            CategoryConfig {
                name: "people".into(),
                destination: "People".into(),
                description: "Notes about a specific person: preferences, facts, follow-ups."
                    .into(),
                aliases: vec!["people".into(), "person".into(), "contact".into()],
                kind: CategoryKind::Person,
            },
            CategoryConfig {
                name: "projects".into(),
                destination: "Projects".into(),
                description: "Notes tied to an ongoing project or initiative.".into(),
                aliases: vec!["projects".into(), "project".into()],
                kind: CategoryKind::Hierarchy,
            },
            CategoryConfig {
                name: "ideas".into(),
                destination: "Ideas".into(),
                description: "Standalone ideas, thoughts, things to explore someday.".into(),
                aliases: vec!["ideas".into(), "idea".into()],
                kind: CategoryKind::Flat,
            },
            CategoryConfig {
                name: "tasks".into(),
                destination: "Tasks".into(),
                description: "Actionable to-dos, errands, admin chores.".into(),
                aliases: vec![
                    "tasks".into(),
                    "task".into(),
                    "admin".into(),
                    "todo".into(),
                    "errand".into(),
                ],
                kind: CategoryKind::Flat,
            },
        ]
    }

    /// Load config from `path`, deep-merging `<stem>.local.json` if present.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;

        let local = local_override_path(path);
        if local.exists() {
            let raw = std::fs::read_to_string(&local)?;
            let overlay: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| ConfigError::ParseError(format!("{}: {e}", local.display())))?;
            deep_merge(&mut value, overlay);
        }

        let mut config: Config = serde_json::from_value(value)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    fn expand_paths(&mut self) {
        for p in [&mut self.vault, &mut self.state_dir, &mut self.message_db] {
            if let Some(s) = p.to_str() {
                *p = expand_home(s);
            }
        }
    }

    /// Fail fast on configuration that would corrupt the pipeline later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handles.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "handles".into(),
                hint: "List the phone numbers or addresses whose messages are captured.".into(),
            });
        }
        if self.categories.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "categories".into(),
                hint: "At least one category is needed to file anything.".into(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for cat in &self.categories {
            if !seen.insert(cat.name.to_lowercase()) {
                return Err(ConfigError::InvalidValue {
                    key: "categories".into(),
                    message: format!("duplicate category name: {}", cat.name),
                });
            }
            if cat.destination.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("categories.{}.destination", cat.name),
                    message: "destination folder must not be empty".into(),
                });
            }
        }
        self.fix_pattern()?;
        Ok(())
    }

    /// Compiled case-insensitive correction prefix pattern.
    pub fn fix_pattern(&self) -> Result<Regex, ConfigError> {
        RegexBuilder::new(&self.fix_prefix)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "fix_prefix".into(),
                message: e.to_string(),
            })
    }

    /// Look up a category by its canonical name, case-insensitively.
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Recipient for needs-review feedback: explicit, or the first handle.
    pub fn feedback_recipient(&self) -> Option<&str> {
        self.feedback
            .recipient
            .as_deref()
            .or_else(|| self.handles.first().map(String::as_str))
    }

    // ── Derived paths ───────────────────────────────────────────────

    pub fn inbox_dir(&self) -> PathBuf {
        self.vault.join(&self.inbox)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.vault.join(&self.archive)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.vault.join(&self.audit_log)
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.state_dir.join("last_processed")
    }
}

fn local_override_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("config");
    path.with_file_name(format!("{stem}.local.json"))
}

/// Recursively merge `overlay` into `base`; overlay scalars win.
fn deep_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay) => *base_slot = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            handles: vec!["+15551234567".into()],
            ..Config::default()
        }
    }

    #[test]
    fn default_categories_cover_standard_four() {
        let cats = Config::default_categories();
        let names: Vec<&str> = cats.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["people", "projects", "ideas", "tasks"]);
        assert_eq!(cats[0].kind, CategoryKind::Person);
        assert_eq!(cats[1].kind, CategoryKind::Hierarchy);
    }

    #[test]
    fn validate_rejects_empty_handles() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn validate_rejects_duplicate_categories() {
        let mut config = valid_config();
        let dup = config.categories[0].clone();
        config.categories.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_fix_prefix() {
        let config = Config {
            fix_prefix: "(".into(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn fix_pattern_is_case_insensitive() {
        let config = valid_config();
        let re = config.fix_pattern().unwrap();
        assert!(re.is_match("FIX: tasks"));
        assert!(re.is_match("fix:   move to people"));
        assert!(!re.is_match("prefix: tasks"));
    }

    #[test]
    fn category_lookup_ignores_case() {
        let config = valid_config();
        assert!(config.category("People").is_some());
        assert!(config.category("zzz").is_none());
    }

    #[test]
    fn feedback_recipient_falls_back_to_first_handle() {
        let config = valid_config();
        assert_eq!(config.feedback_recipient(), Some("+15551234567"));

        let explicit = Config {
            feedback: FeedbackConfig {
                enabled: true,
                recipient: Some("me@example.com".into()),
            },
            ..valid_config()
        };
        assert_eq!(explicit.feedback_recipient(), Some("me@example.com"));
    }

    #[test]
    fn deep_merge_overrides_nested_scalars() {
        let mut base = serde_json::json!({
            "feedback": {"enabled": true, "recipient": null},
            "inbox": "Inbox"
        });
        let overlay = serde_json::json!({
            "feedback": {"enabled": false}
        });
        deep_merge(&mut base, overlay);
        assert_eq!(base["feedback"]["enabled"], false);
        assert_eq!(base["inbox"], "Inbox");
    }

    #[test]
    fn load_merges_local_override() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("config.json");
        std::fs::write(
            &base,
            serde_json::json!({
                "vault": dir.path().join("vault"),
                "handles": ["+15550000000"]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("config.local.json"),
            serde_json::json!({"handles": ["+15559999999"], "poll_interval_secs": 60}).to_string(),
        )
        .unwrap();

        let config = Config::load(&base).unwrap();
        assert_eq!(config.handles, ["+15559999999"]);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.inbox, "Inbox");
    }

    #[test]
    fn derived_paths_join_vault() {
        let config = Config {
            vault: PathBuf::from("/v"),
            ..valid_config()
        };
        assert_eq!(config.inbox_dir(), PathBuf::from("/v/Inbox"));
        assert_eq!(config.audit_path(), PathBuf::from("/v/Inbox-Log.md"));
    }
}
