// ABOUTME: Scan orchestration under the scan lock: load state, scan, persist, notify.
// ABOUTME: Both the scheduler and the manual trigger go through Monitor::run_scan.

use std::fmt;
use std::io;
use std::sync::{Mutex, TryLockError};

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{ScanError, StoreError};
use crate::fetch::PageSource;
use crate::models::{ChangeRecord, ScanMetadata};
use crate::notify::{Notifier, LOG_CHANNEL};
use crate::scan::scan_sites;
use crate::store::{StateStore, LOCK_FILE};

/// What started a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Startup,
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Startup => "startup",
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub trigger: Trigger,
    pub changes: Vec<ChangeRecord>,
    pub checked: usize,
    pub errors: usize,
    /// The notifier accepted the digest.
    pub notified: bool,
    pub message: String,
}

/// Owns the state store, page source and notifier, and serializes scans.
pub struct Monitor {
    store: StateStore,
    source: Box<dyn PageSource>,
    notifier: Box<dyn Notifier>,
    scan_lock: Mutex<()>,
}

impl Monitor {
    pub fn new(
        store: StateStore,
        source: Box<dyn PageSource>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            scan_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn metadata(&self) -> Result<ScanMetadata, StoreError> {
        self.store.load_metadata()
    }

    /// Manual "check now".
    pub fn check_now(&self) -> Result<ScanSummary, ScanError> {
        self.run_scan(Trigger::Manual)
    }

    /// Runs one scan, or returns [`ScanError::Busy`] if another is in progress
    /// in this process or in any other process sharing the data directory.
    pub fn run_scan(&self, trigger: Trigger) -> Result<ScanSummary, ScanError> {
        let _guard = match self.scan_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                warn!(%trigger, "scan already running; trigger rejected");
                return Err(ScanError::Busy);
            }
            // A panicked scan left no partial state on disk; carry on.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let mut lock_file = self.store.lock_file()?;
        let _file_guard = match lock_file.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(%trigger, "data directory locked by another process; trigger rejected");
                return Err(ScanError::Busy);
            }
            Err(e) => return Err(StoreError::io(self.store.path(LOCK_FILE), e).into()),
        };

        info!(%trigger, "scan started");
        let mut sites = self.store.load_sites()?;
        let mut snapshots = self.store.load_snapshots()?;

        let report = scan_sites(&mut sites.sites, &mut snapshots, self.source.as_ref());

        self.store.save_snapshots(&snapshots)?;
        if report.config_dirty() {
            self.store.save_sites(&sites)?;
        }
        self.store.save_metadata(&ScanMetadata::completed_at(Local::now()))?;

        info!(
            %trigger,
            checked = report.checked,
            changes = report.changes.len(),
            baselines = report.baselines,
            unchanged = report.unchanged,
            errors = report.errors,
            "scan finished"
        );

        let (notified, message) = self.deliver(&report.changes);
        Ok(ScanSummary {
            trigger,
            changes: report.changes,
            checked: report.checked,
            errors: report.errors,
            notified,
            message,
        })
    }

    fn deliver(&self, changes: &[ChangeRecord]) -> (bool, String) {
        if changes.is_empty() {
            return (false, "No changes detected.".to_string());
        }

        let count = changes.len();
        match self.notifier.notify(changes) {
            Ok(()) if self.notifier.channel() == LOG_CHANNEL => (
                true,
                format!("Found {} change(s). Email not configured; digest logged.", count),
            ),
            Ok(()) => (true, format!("Found {} change(s). Email sent!", count)),
            Err(e) => {
                error!(error = %e, channel = self.notifier.channel(), "digest delivery failed");
                (
                    false,
                    format!("Found {} change(s). Email delivery failed: {}", count, e),
                )
            }
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("store", &self.store)
            .field("notifier", &self.notifier.channel())
            .finish_non_exhaustive()
    }
}
