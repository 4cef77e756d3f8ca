// ABOUTME: Core library for pagewatch, a daily web page change monitor.
// ABOUTME: Provides fetching, content normalization, change detection, state storage and digests.

pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod models;
pub mod monitor;
pub mod normalize;
pub mod notify;
pub mod registry;
pub mod scan;
pub mod schedule;
pub mod select;
pub mod store;

pub use config::{AppConfig, SmtpSettings};
pub use digest::Digest;
pub use error::{ConfigError, NotifyError, RegistryError, ScanError, StoreError};
pub use fetch::{FailureKind, FetchFailure, FetchOutcome, FetchResult, Fetcher, PageSource};
pub use fingerprint::Fingerprint;
pub use models::{
    ChangeRecord, ScanMetadata, SiteConfig, SiteList, SiteSnapshot, SiteStatusView, SnapshotMap,
    SnapshotStatus, DEFAULT_CATEGORY,
};
pub use monitor::{Monitor, ScanSummary, Trigger};
pub use normalize::normalize;
pub use notify::{notifier_from_settings, LogNotifier, Notifier, SmtpNotifier};
pub use registry::SiteRegistry;
pub use scan::{scan_sites, ScanReport};
pub use schedule::{DailySchedule, FireDecision, Scheduler, SchedulerState};
pub use select::SelectorOutcome;
pub use store::StateStore;
