// ABOUTME: Persisted and in-flight records: site configuration, snapshots, scan metadata, changes.
// ABOUTME: Serialized as JSON by the state store; timestamps are local RFC 3339.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Category assigned when none is given.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A monitored page. `url` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Set when the operator edited the title; scans then leave it alone.
    #[serde(default, skip_serializing_if = "is_false")]
    pub title_locked: bool,
    pub added: DateTime<Local>,
}

impl SiteConfig {
    pub fn new(url: impl Into<String>, category: impl Into<String>, added: DateTime<Local>) -> Self {
        Self {
            url: url.into(),
            category: category.into(),
            selector: None,
            title: None,
            title_locked: false,
            added,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Selector to apply, ignoring blank values.
    pub fn active_selector(&self) -> Option<&str> {
        self.selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// The site list document (`config.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteList {
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// Result of the latest check of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// Configured but never checked. Not stored; reported by listings.
    New,
    Baseline,
    Unchanged,
    Changed,
    Error,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotStatus::New => "new",
            SnapshotStatus::Baseline => "baseline",
            SnapshotStatus::Unchanged => "unchanged",
            SnapshotStatus::Changed => "changed",
            SnapshotStatus::Error => "error",
        };
        f.pad(s)
    }
}

/// Last known state of one URL.
///
/// `baseline`, `unchanged` and `changed` always carry a fingerprint. An
/// `error` snapshot keeps whatever fingerprint the URL had before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_fingerprint: Option<Fingerprint>,
    pub last_check: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Local>>,
    pub status: SnapshotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// URL-keyed snapshots (`snapshots.json`). Ordered so the file is stable.
pub type SnapshotMap = BTreeMap<String, SiteSnapshot>;

/// Bookkeeping for scan dedup (`metadata.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    #[serde(default)]
    pub last_check_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_check_time: Option<DateTime<Local>>,
}

impl ScanMetadata {
    /// Metadata recording a scan completed at `at`.
    pub fn completed_at(at: DateTime<Local>) -> Self {
        Self {
            last_check_date: Some(at.date_naive()),
            last_check_time: Some(at),
        }
    }
}

/// One detected change, handed to the notifier and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub url: String,
    pub category: String,
    pub title: Option<String>,
    pub previous_fingerprint: Option<Fingerprint>,
    pub new_fingerprint: Fingerprint,
    pub detected_at: DateTime<Local>,
}

/// A configured site joined with its latest snapshot, for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteStatusView {
    pub index: usize,
    #[serde(flatten)]
    pub site: SiteConfig,
    pub status: SnapshotStatus,
    pub last_check: Option<DateTime<Local>>,
    pub last_changed: Option<DateTime<Local>>,
    pub error: Option<String>,
}

impl SiteStatusView {
    pub fn new(index: usize, site: SiteConfig, snapshot: Option<&SiteSnapshot>) -> Self {
        Self {
            index,
            site,
            status: snapshot.map(|s| s.status).unwrap_or(SnapshotStatus::New),
            last_check: snapshot.map(|s| s.last_check),
            last_changed: snapshot.and_then(|s| s.last_changed),
            error: snapshot.and_then(|s| s.error.clone()),
        }
    }
}
