// ABOUTME: Error types for storage, registry, notification, configuration and scan operations.
// ABOUTME: Fetch failures are not errors here; they travel inside FetchOutcome (see fetch.rs).

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the JSON state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading, writing or renaming a state file failed.
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state file exists but does not hold the expected document.
    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The site list contains the same URL more than once.
    #[error("site list contains duplicate URL: {0}")]
    DuplicateUrl(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Validation failures at the site registry boundary.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("URL is required")]
    MissingUrl,

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL already monitored: {0}")]
    DuplicateUrl(String),

    #[error("invalid index {index} (have {len} sites)")]
    InvalidIndex { index: usize, len: usize },

    #[error("category must not be empty")]
    EmptyCategory,

    #[error("title must not be empty")]
    EmptyTitle,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Creates an InvalidUrl error from any displayable parse failure.
    pub fn invalid_url(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RegistryError::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Digest delivery failures. Never abort a scan.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email is not configured (set SMTP_USERNAME, FROM_EMAIL and TO_EMAIL)")]
    NotConfigured,

    #[error("invalid email address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Invalid values in the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Reasons a scan did not run to completion.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Another scan holds the scan lock.
    #[error("a scan is already running")]
    Busy,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    /// Returns true if the trigger was rejected because a scan was running.
    pub fn is_busy(&self) -> bool {
        matches!(self, ScanError::Busy)
    }
}
