//! Error types for Note Assist.

use std::time::Duration;

/// Top-level error type for the capture pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Correction error: {0}")]
    Correction(#[from] CorrectionError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message source errors. All retryable on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Message source unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("Message source query failed: {0}")]
    Query(String),
}

/// Item store and cursor persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Malformed item document at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Item not found: {source_id}")]
    NotFound { source_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Correction resolution errors.
///
/// None of these are retryable — a stale correction stays stale — so the
/// pipeline discards the correction and logs the failure.
#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("Correction target not captured: {reply_to}")]
    TargetNotFound { reply_to: String },

    #[error("No recent audit entry to correct")]
    NoRecentItem,

    #[error("Unrecognized category in correction: {input:?}")]
    UnknownCategory { input: String },

    #[error("Store error while resolving correction: {0}")]
    Store(#[from] StoreError),
}

/// Classifier errors. The item stays unprocessed and is retried next cycle.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Classifier timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Classifier unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid classifier response: {reason}")]
    InvalidResponse { reason: String },
}

/// Routing/archival errors. The item stays unprocessed and is retried.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Destination write failed for {path}: {reason}")]
    DestinationWrite { path: String, reason: String },

    #[error("Archive move failed for {path}: {reason}")]
    ArchiveMove { path: String, reason: String },

    #[error("Unknown category from classifier: {name}")]
    UnknownCategory { name: String },

    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outbound notification errors. Logged, never fatal to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send notification: {reason}")]
    SendFailed { reason: String },

    #[error("Notification send timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
