// ABOUTME: Validated edits to the monitored site list: list, add, remove, and field updates.
// ABOUTME: Every edit holds the data directory lock while it loads, changes and saves the documents.

use std::io;

use chrono::Local;
use tracing::info;
use url::{ParseError, Url};

use crate::error::{RegistryError, StoreError};
use crate::models::{SiteConfig, SiteStatusView, DEFAULT_CATEGORY};
use crate::store::{StateStore, LOCK_FILE};

/// Prepends `https://` to a bare host and checks the result parses as an
/// http(s) URL with a host.
pub fn normalize_url(input: &str) -> Result<String, RegistryError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::MissingUrl);
    }

    // `host:port` parses with the host as its scheme and no authority.
    let (candidate, parsed) = match Url::parse(trimmed) {
        Ok(url) if !url.cannot_be_a_base() => (trimmed.to_string(), url),
        Ok(_) | Err(ParseError::RelativeUrlWithoutBase) => {
            let candidate = format!("https://{}", trimmed);
            let parsed =
                Url::parse(&candidate).map_err(|e| RegistryError::invalid_url(trimmed, e))?;
            (candidate, parsed)
        }
        Err(e) => return Err(RegistryError::invalid_url(trimmed, e)),
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(RegistryError::invalid_url(
            trimmed,
            "scheme must be http or https",
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(RegistryError::invalid_url(trimmed, "missing host"));
    }

    Ok(candidate)
}

/// Site list operations over a [`StateStore`].
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    store: StateStore,
}

impl SiteRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// All sites in stored order, joined with their snapshot status.
    pub fn list(&self) -> Result<Vec<SiteStatusView>, RegistryError> {
        let sites = self.store.load_sites()?;
        let snapshots = self.store.load_snapshots()?;
        Ok(sites
            .sites
            .into_iter()
            .enumerate()
            .map(|(index, site)| {
                let snapshot = snapshots.get(&site.url);
                SiteStatusView::new(index, site, snapshot)
            })
            .collect())
    }

    /// Registers a site. A blank category becomes `Uncategorized`; a blank
    /// selector is dropped.
    pub fn add(
        &self,
        url: &str,
        category: Option<&str>,
        selector: Option<&str>,
    ) -> Result<SiteConfig, RegistryError> {
        let url = normalize_url(url)?;
        self.exclusive(|| {
            let mut list = self.store.load_sites()?;
            if list.sites.iter().any(|s| s.url == url) {
                return Err(RegistryError::DuplicateUrl(url.clone()));
            }

            let category = category
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CATEGORY);
            let mut site = SiteConfig::new(url.clone(), category, Local::now());
            if let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) {
                site = site.with_selector(selector);
            }

            list.sites.push(site.clone());
            self.store.save_sites(&list)?;
            info!(url = %site.url, category = %site.category, "site added");
            Ok(site)
        })
    }

    /// Removes the site at `index` together with its snapshot.
    pub fn remove(&self, index: usize) -> Result<SiteConfig, RegistryError> {
        self.exclusive(|| {
            let mut list = self.store.load_sites()?;
            check_index(index, list.sites.len())?;
            let removed = list.sites.remove(index);
            self.store.save_sites(&list)?;

            let mut snapshots = self.store.load_snapshots()?;
            if snapshots.remove(&removed.url).is_some() {
                self.store.save_snapshots(&snapshots)?;
            }
            info!(url = %removed.url, "site removed");
            Ok(removed)
        })
    }

    pub fn update_category(&self, index: usize, category: &str) -> Result<SiteConfig, RegistryError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(RegistryError::EmptyCategory);
        }
        self.edit(index, |site| site.category = category.to_string())
    }

    /// Sets the title and locks it against scan updates.
    pub fn update_title(&self, index: usize, title: &str) -> Result<SiteConfig, RegistryError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RegistryError::EmptyTitle);
        }
        self.edit(index, |site| {
            site.title = Some(title.to_string());
            site.title_locked = true;
        })
    }

    /// Lets scans refresh the title again.
    pub fn unlock_title(&self, index: usize) -> Result<SiteConfig, RegistryError> {
        self.edit(index, |site| site.title_locked = false)
    }

    /// Sets or (with `None` or a blank value) clears the selector.
    pub fn update_selector(
        &self,
        index: usize,
        selector: Option<&str>,
    ) -> Result<SiteConfig, RegistryError> {
        let selector = selector
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self.edit(index, |site| site.selector = selector)
    }

    fn edit<F>(&self, index: usize, apply: F) -> Result<SiteConfig, RegistryError>
    where
        F: FnOnce(&mut SiteConfig),
    {
        self.exclusive(|| {
            let mut list = self.store.load_sites()?;
            check_index(index, list.sites.len())?;
            apply(&mut list.sites[index]);
            let updated = list.sites[index].clone();
            self.store.save_sites(&list)?;
            Ok(updated)
        })
    }

    /// Runs `f` holding the data directory lock, waiting out a running scan
    /// so its save of the site list cannot overwrite this edit.
    fn exclusive<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce() -> Result<T, RegistryError>,
    {
        let lock_error = |e: io::Error| StoreError::io(self.store.path(LOCK_FILE), e);
        let mut lock_file = self.store.lock_file()?;
        match lock_file.try_write() {
            Ok(_guard) => return f(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                info!("scan in progress; waiting to edit the site list");
            }
            Err(e) => return Err(lock_error(e).into()),
        }
        let _guard = lock_file.write().map_err(lock_error)?;
        f()
    }
}

fn check_index(index: usize, len: usize) -> Result<(), RegistryError> {
    if index >= len {
        return Err(RegistryError::InvalidIndex { index, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::models::{SiteSnapshot, SnapshotStatus};
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> SiteRegistry {
        SiteRegistry::new(StateStore::open(temp.path()).unwrap())
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_url("  http://example.com/a ").unwrap(),
            "http://example.com/a"
        );
        assert!(matches!(normalize_url("  "), Err(RegistryError::MissingUrl)));
        assert!(matches!(
            normalize_url("ftp://example.com"),
            Err(RegistryError::InvalidUrl { .. })
        ));
        assert!(matches!(
            normalize_url("https://"),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_normalize_url_bare_host_with_embedded_url() {
        assert_eq!(
            normalize_url("example.com/?next=https://x").unwrap(),
            "https://example.com/?next=https://x"
        );
        assert_eq!(
            normalize_url("localhost:8080/status").unwrap(),
            "https://localhost:8080/status"
        );
        assert_eq!(
            normalize_url("HTTP://Example.com/a?b=https://c").unwrap(),
            "HTTP://Example.com/a?b=https://c"
        );
    }

    #[test]
    fn test_edit_waits_for_held_lock() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.add("a.test", None, None).unwrap();

        let mut lock_file = reg.store().lock_file().unwrap();
        let held = lock_file.try_write().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let editor = {
            let reg = registry(&temp);
            thread::spawn(move || {
                let result = reg.add("b.test", None, None);
                done_tx.send(()).unwrap();
                result
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(reg.store().load_sites().unwrap().sites.len(), 1);

        drop(held);
        assert_eq!(editor.join().unwrap().unwrap().url, "https://b.test");
        assert_eq!(reg.list().unwrap().len(), 2);
    }

    #[test]
    fn test_add_bare_host_gets_https() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        let site = reg.add("example.com", None, None).unwrap();
        assert_eq!(site.url, "https://example.com");
        assert_eq!(site.category, DEFAULT_CATEGORY);

        let stored = reg.store().load_sites().unwrap();
        assert_eq!(stored.sites[0].url, "https://example.com");
    }

    #[test]
    fn test_add_rejects_duplicate() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.add("example.com", Some("News"), None).unwrap();

        let err = reg.add("https://example.com", None, None).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateUrl(_)));
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn test_add_keeps_selector_and_drops_blank() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        let a = reg.add("a.test", Some(" Shop "), Some(" .price ")).unwrap();
        let b = reg.add("b.test", Some(""), Some("   ")).unwrap();

        assert_eq!(a.category, "Shop");
        assert_eq!(a.selector.as_deref(), Some(".price"));
        assert_eq!(b.category, DEFAULT_CATEGORY);
        assert!(b.selector.is_none());
    }

    #[test]
    fn test_remove_deletes_snapshot() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.add("a.test", None, None).unwrap();
        reg.add("b.test", None, None).unwrap();

        let mut snapshots = reg.store().load_snapshots().unwrap();
        for url in ["https://a.test", "https://b.test"] {
            snapshots.insert(
                url.to_string(),
                SiteSnapshot {
                    fingerprint: Some(Fingerprint::of(url)),
                    previous_fingerprint: None,
                    last_check: Local::now(),
                    last_changed: None,
                    status: SnapshotStatus::Baseline,
                    error: None,
                },
            );
        }
        reg.store().save_snapshots(&snapshots).unwrap();

        let removed = reg.remove(0).unwrap();
        assert_eq!(removed.url, "https://a.test");

        let snapshots = reg.store().load_snapshots().unwrap();
        assert!(!snapshots.contains_key("https://a.test"));
        assert!(snapshots.contains_key("https://b.test"));
        assert!(matches!(
            reg.remove(5),
            Err(RegistryError::InvalidIndex { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_update_category_and_title() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.add("a.test", None, None).unwrap();

        assert!(matches!(
            reg.update_category(0, "  "),
            Err(RegistryError::EmptyCategory)
        ));
        assert!(matches!(reg.update_title(0, ""), Err(RegistryError::EmptyTitle)));

        let site = reg.update_category(0, "Jobs").unwrap();
        assert_eq!(site.category, "Jobs");

        let site = reg.update_title(0, "Careers page").unwrap();
        assert_eq!(site.title.as_deref(), Some("Careers page"));
        assert!(site.title_locked);

        let site = reg.unlock_title(0).unwrap();
        assert!(!site.title_locked);
    }

    #[test]
    fn test_update_selector_sets_and_clears() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.add("a.test", None, None).unwrap();

        let site = reg.update_selector(0, Some("#main")).unwrap();
        assert_eq!(site.selector.as_deref(), Some("#main"));
        let site = reg.update_selector(0, None).unwrap();
        assert!(site.selector.is_none());
    }

    #[test]
    fn test_list_reports_new_for_unchecked() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.add("a.test", Some("News"), None).unwrap();

        let views = reg.list().unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].index, 0);
        assert_eq!(views[0].status, SnapshotStatus::New);
    }
}
