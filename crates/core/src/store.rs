// ABOUTME: Durable JSON state: site list, URL-keyed snapshots and scan metadata.
// ABOUTME: Each document is loaded whole and replaced whole via write-temp-then-rename.

//! JSON state store.
//!
//! The data directory holds three pretty-printed documents:
//! - `config.json`: `{"sites": [...]}`
//! - `snapshots.json`: URL → snapshot
//! - `metadata.json`: last completed scan date/time
//!
//! Writes go to `<name>.tmp` next to the target, are synced, then renamed
//! over it, so a crash never leaves a truncated document behind.
//!
//! `scan.lock` is an advisory lock file. Scans and site list edits hold it
//! exclusively, so separate processes sharing a directory never interleave.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{ScanMetadata, SiteList, SnapshotMap};

pub const CONFIG_FILE: &str = "config.json";
pub const SNAPSHOTS_FILE: &str = "snapshots.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const LOCK_FILE: &str = "scan.lock";

/// Handle to a data directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Opens `dir`, creating it and any missing document with empty defaults.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { dir: dir.into() };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        if !self.path(CONFIG_FILE).exists() {
            self.save_sites(&SiteList::default())?;
        }
        if !self.path(SNAPSHOTS_FILE).exists() {
            self.save_snapshots(&SnapshotMap::new())?;
        }
        if !self.path(METADATA_FILE).exists() {
            self.save_metadata(&ScanMetadata::default())?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Opens the directory's advisory lock. Callers take `try_write` or
    /// `write` on it and hold the guard for the whole read-modify-write.
    pub fn lock_file(&self) -> Result<RwLock<File>, StoreError> {
        let path = self.path(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(RwLock::new(file))
    }

    /// Loads the site list, rejecting repeated URLs.
    pub fn load_sites(&self) -> Result<SiteList, StoreError> {
        let list: SiteList = self.read(CONFIG_FILE)?;
        let mut seen = HashSet::new();
        for site in &list.sites {
            if !seen.insert(site.url.as_str()) {
                return Err(StoreError::DuplicateUrl(site.url.clone()));
            }
        }
        Ok(list)
    }

    pub fn save_sites(&self, sites: &SiteList) -> Result<(), StoreError> {
        self.write(CONFIG_FILE, sites)
    }

    pub fn load_snapshots(&self) -> Result<SnapshotMap, StoreError> {
        self.read(SNAPSHOTS_FILE)
    }

    pub fn save_snapshots(&self, snapshots: &SnapshotMap) -> Result<(), StoreError> {
        self.write(SNAPSHOTS_FILE, snapshots)
    }

    pub fn load_metadata(&self) -> Result<ScanMetadata, StoreError> {
        self.read(METADATA_FILE)
    }

    pub fn save_metadata(&self, metadata: &ScanMetadata) -> Result<(), StoreError> {
        self.write(METADATA_FILE, metadata)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.path(name);
        let contents = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| StoreError::json(&path, e))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path(name);
        let mut encoded =
            serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(&path, e))?;
        encoded.push(b'\n');
        write_atomic(&path, &encoded)
    }
}

/// Writes `contents` to `path` through a synced sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let temp_path = path.with_extension("json.tmp");
    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}
