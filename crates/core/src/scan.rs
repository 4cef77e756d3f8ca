// ABOUTME: Change detection: fetches every configured site and compares against its snapshot.
// ABOUTME: Works on in-memory state only; the Monitor loads and persists around it.

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::fetch::{FetchFailure, FetchOutcome, PageSource};
use crate::fingerprint::Fingerprint;
use crate::models::{ChangeRecord, SiteConfig, SiteSnapshot, SnapshotMap, SnapshotStatus};

/// What one pass over the site list produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub changes: Vec<ChangeRecord>,
    pub checked: usize,
    pub baselines: usize,
    pub unchanged: usize,
    pub errors: usize,
    /// Sites whose title was refreshed from the page; non-zero means the
    /// site list must be saved.
    pub titles_updated: usize,
}

impl ScanReport {
    pub fn config_dirty(&self) -> bool {
        self.titles_updated > 0
    }
}

/// Fetches each site in stored order and updates `snapshots` in place.
///
/// A failed fetch marks only that site as `error`; the loop always
/// continues. First observations become `baseline` and never produce a
/// change record.
pub fn scan_sites(
    sites: &mut [SiteConfig],
    snapshots: &mut SnapshotMap,
    source: &dyn PageSource,
) -> ScanReport {
    let mut report = ScanReport::default();

    for site in sites.iter_mut() {
        let selector = site.active_selector().map(str::to_string);
        info!(url = %site.url, selector = selector.as_deref(), "checking site");

        let result = source.fetch(&site.url, selector.as_deref());
        let now = Local::now();
        report.checked += 1;

        if let Some(title) = result.title {
            if !site.title_locked && site.title.as_deref() != Some(title.as_str()) {
                info!(url = %site.url, %title, "updated title");
                site.title = Some(title);
                report.titles_updated += 1;
            }
        }

        match result.outcome {
            FetchOutcome::Failed(failure) => {
                warn!(url = %site.url, error = %failure, "fetch failed");
                record_error(snapshots, &site.url, &failure, now);
                report.errors += 1;
            }
            FetchOutcome::Success {
                fingerprint,
                selector: outcome,
            } => {
                if let Some(outcome) = outcome.filter(|o| o.is_fallback()) {
                    warn!(url = %site.url, selector = selector.as_deref(), "selector {}", outcome);
                }

                let previous = snapshots
                    .get(&site.url)
                    .and_then(|s| s.fingerprint.clone());

                match previous {
                    None => {
                        info!(url = %site.url, fingerprint = fingerprint.short(), "baseline recorded");
                        snapshots.insert(
                            site.url.clone(),
                            SiteSnapshot {
                                fingerprint: Some(fingerprint),
                                previous_fingerprint: None,
                                last_check: now,
                                last_changed: None,
                                status: SnapshotStatus::Baseline,
                                error: None,
                            },
                        );
                        report.baselines += 1;
                    }
                    Some(previous) if previous == fingerprint => {
                        if let Some(snapshot) = snapshots.get_mut(&site.url) {
                            snapshot.last_check = now;
                            snapshot.status = SnapshotStatus::Unchanged;
                            snapshot.error = None;
                        }
                        info!(url = %site.url, "no change");
                        report.unchanged += 1;
                    }
                    Some(previous) => {
                        info!(
                            url = %site.url,
                            from = previous.short(),
                            to = fingerprint.short(),
                            "change detected"
                        );
                        record_change(snapshots, &site.url, previous.clone(), fingerprint.clone(), now);
                        report.changes.push(ChangeRecord {
                            url: site.url.clone(),
                            category: site.category.clone(),
                            title: site.title.clone(),
                            previous_fingerprint: Some(previous),
                            new_fingerprint: fingerprint,
                            detected_at: now,
                        });
                    }
                }
            }
        }
    }

    report
}

fn record_error(
    snapshots: &mut SnapshotMap,
    url: &str,
    failure: &FetchFailure,
    now: DateTime<Local>,
) {
    let detail = failure.to_string();
    match snapshots.get_mut(url) {
        Some(snapshot) => {
            snapshot.last_check = now;
            snapshot.status = SnapshotStatus::Error;
            snapshot.error = Some(detail);
        }
        None => {
            snapshots.insert(
                url.to_string(),
                SiteSnapshot {
                    fingerprint: None,
                    previous_fingerprint: None,
                    last_check: now,
                    last_changed: None,
                    status: SnapshotStatus::Error,
                    error: Some(detail),
                },
            );
        }
    }
}

fn record_change(
    snapshots: &mut SnapshotMap,
    url: &str,
    previous: Fingerprint,
    fingerprint: Fingerprint,
    now: DateTime<Local>,
) {
    snapshots.insert(
        url.to_string(),
        SiteSnapshot {
            fingerprint: Some(fingerprint),
            previous_fingerprint: Some(previous),
            last_check: now,
            last_changed: Some(now),
            status: SnapshotStatus::Changed,
            error: None,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FailureKind, FetchResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies per URL; URLs without a body fail to connect.
    #[derive(Default)]
    struct FakeSource {
        pages: Mutex<HashMap<String, String>>,
    }

    impl FakeSource {
        fn set(&self, url: &str, body: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_string());
        }

        fn remove(&self, url: &str) {
            self.pages.lock().unwrap().remove(url);
        }
    }

    impl PageSource for FakeSource {
        fn fetch(&self, url: &str, selector: Option<&str>) -> FetchResult {
            match self.pages.lock().unwrap().get(url) {
                Some(body) => FetchResult::from_html(body, selector),
                None => FetchResult::failed(FetchFailure::new(
                    FailureKind::Connect,
                    "connection refused",
                )),
            }
        }
    }

    fn site(url: &str, category: &str) -> SiteConfig {
        SiteConfig::new(url, category, Local::now())
    }

    #[test]
    fn test_first_scan_is_baseline_without_changes() {
        let source = FakeSource::default();
        source.set("https://a.test", "<p>Hello</p>");
        let mut sites = vec![site("https://a.test", "News")];
        let mut snapshots = SnapshotMap::new();

        let report = scan_sites(&mut sites, &mut snapshots, &source);

        assert!(report.changes.is_empty());
        assert_eq!(report.baselines, 1);
        let snap = &snapshots["https://a.test"];
        assert_eq!(snap.status, SnapshotStatus::Baseline);
        assert_eq!(snap.fingerprint, Some(Fingerprint::of("Hello")));
    }

    #[test]
    fn test_change_emitted_only_when_fingerprint_differs() {
        let source = FakeSource::default();
        source.set("https://a.test", "<p>Hello</p>");
        let mut sites = vec![site("https://a.test", "News")];
        let mut snapshots = SnapshotMap::new();
        scan_sites(&mut sites, &mut snapshots, &source);

        // markup-only edit: same visible text
        source.set("https://a.test", "<div><p class='x'>Hello</p></div>");
        let report = scan_sites(&mut sites, &mut snapshots, &source);
        assert!(report.changes.is_empty());
        assert_eq!(snapshots["https://a.test"].status, SnapshotStatus::Unchanged);

        source.set("https://a.test", "<p>Hello again</p>");
        let report = scan_sites(&mut sites, &mut snapshots, &source);
        assert_eq!(report.changes.len(), 1);
        let change = &report.changes[0];
        assert_eq!(change.category, "News");
        assert_eq!(change.previous_fingerprint, Some(Fingerprint::of("Hello")));
        assert_eq!(change.new_fingerprint, Fingerprint::of("Hello again"));

        let snap = &snapshots["https://a.test"];
        assert_eq!(snap.status, SnapshotStatus::Changed);
        assert_eq!(snap.last_changed, Some(change.detected_at));
        assert_eq!(snap.previous_fingerprint, Some(Fingerprint::of("Hello")));
    }

    #[test]
    fn test_two_site_scenario() {
        let source = FakeSource::default();
        source.set("https://a.test", "<p>Hello</p>");
        source.set("https://b.test", "<p>World</p>");
        let mut sites = vec![site("https://a.test", "A"), site("https://b.test", "B")];
        let mut snapshots = SnapshotMap::new();

        let first = scan_sites(&mut sites, &mut snapshots, &source);
        assert!(first.changes.is_empty());
        assert_eq!(snapshots["https://a.test"].status, SnapshotStatus::Baseline);
        assert_eq!(snapshots["https://b.test"].status, SnapshotStatus::Baseline);

        source.set("https://b.test", "<p>World!!</p>");
        let second = scan_sites(&mut sites, &mut snapshots, &source);
        assert_eq!(second.changes.len(), 1);
        assert_eq!(second.changes[0].url, "https://b.test");
        assert_eq!(snapshots["https://a.test"].status, SnapshotStatus::Unchanged);
        assert_eq!(snapshots["https://b.test"].status, SnapshotStatus::Changed);
    }

    #[test]
    fn test_error_isolated_and_fingerprint_preserved() {
        let source = FakeSource::default();
        for url in ["https://a.test", "https://b.test", "https://c.test"] {
            source.set(url, "<p>v1</p>");
        }
        let mut sites = vec![
            site("https://a.test", "x"),
            site("https://b.test", "x"),
            site("https://c.test", "x"),
        ];
        let mut snapshots = SnapshotMap::new();
        scan_sites(&mut sites, &mut snapshots, &source);

        source.remove("https://b.test");
        source.set("https://a.test", "<p>v2</p>");
        source.set("https://c.test", "<p>v2</p>");
        let report = scan_sites(&mut sites, &mut snapshots, &source);

        assert_eq!(report.errors, 1);
        let urls: Vec<_> = report.changes.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test", "https://c.test"]);

        let failed = &snapshots["https://b.test"];
        assert_eq!(failed.status, SnapshotStatus::Error);
        assert_eq!(failed.fingerprint, Some(Fingerprint::of("v1")));
        assert!(failed.error.as_deref().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_error_then_recovery_is_baseline() {
        let source = FakeSource::default();
        let mut sites = vec![site("https://a.test", "x")];
        let mut snapshots = SnapshotMap::new();

        let report = scan_sites(&mut sites, &mut snapshots, &source);
        assert_eq!(report.errors, 1);
        assert_eq!(snapshots["https://a.test"].status, SnapshotStatus::Error);
        assert!(snapshots["https://a.test"].fingerprint.is_none());

        source.set("https://a.test", "<p>up</p>");
        let report = scan_sites(&mut sites, &mut snapshots, &source);
        assert!(report.changes.is_empty());
        assert_eq!(snapshots["https://a.test"].status, SnapshotStatus::Baseline);
        assert!(snapshots["https://a.test"].error.is_none());
    }

    #[test]
    fn test_title_updates_respect_lock() {
        let source = FakeSource::default();
        source.set("https://a.test", "<title>Fresh</title><p>x</p>");
        source.set("https://b.test", "<title>Fresh</title><p>x</p>");
        let mut locked = site("https://b.test", "x");
        locked.title = Some("Mine".to_string());
        locked.title_locked = true;
        let mut sites = vec![site("https://a.test", "x"), locked];
        let mut snapshots = SnapshotMap::new();

        let report = scan_sites(&mut sites, &mut snapshots, &source);
        assert_eq!(report.titles_updated, 1);
        assert!(report.config_dirty());
        assert_eq!(sites[0].title.as_deref(), Some("Fresh"));
        assert_eq!(sites[1].title.as_deref(), Some("Mine"));

        let report = scan_sites(&mut sites, &mut snapshots, &source);
        assert_eq!(report.titles_updated, 0);
    }

    #[test]
    fn test_selector_miss_matches_whole_page() {
        let source = FakeSource::default();
        source.set("https://a.test", "<p>Whole</p>");
        source.set("https://b.test", "<p>Whole</p>");
        let mut sites = vec![
            site("https://a.test", "x").with_selector("#missing"),
            site("https://b.test", "x"),
        ];
        let mut snapshots = SnapshotMap::new();
        scan_sites(&mut sites, &mut snapshots, &source);

        assert_eq!(
            snapshots["https://a.test"].fingerprint,
            snapshots["https://b.test"].fingerprint
        );
    }
}
