//! Freshness policies decide whether a stage may skip a source file because
//! its output is already up to date.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};

use crate::hash::Hash32;

pub trait Freshness: Send + Sync {
    /// Returns `true` when `target` doesn't need to be regenerated from `source`.
    fn is_fresh(&self, source: &Utf8Path, target: &Utf8Path) -> bool;

    /// Called after `target` was successfully written from `source`.
    fn record(&self, _source: &Utf8Path, _target: &Utf8Path) {}
}

/// Where modification times come from.
pub trait Timestamps: Send + Sync {
    fn modified(&self, path: &Utf8Path) -> Option<SystemTime>;
}

/// Reads modification times from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disk;

impl Timestamps for Disk {
    fn modified(&self, path: &Utf8Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }
}

/// Skips a source when its output exists and is at least as new.
#[derive(Debug, Default, Clone)]
pub struct ModifiedTime<T: Timestamps = Disk> {
    timestamps: T,
}

impl ModifiedTime {
    pub fn new() -> Self {
        Self { timestamps: Disk }
    }
}

impl<T: Timestamps> ModifiedTime<T> {
    pub fn with(timestamps: T) -> Self {
        Self { timestamps }
    }
}

impl<T: Timestamps> Freshness for ModifiedTime<T> {
    fn is_fresh(&self, source: &Utf8Path, target: &Utf8Path) -> bool {
        match (
            self.timestamps.modified(source),
            self.timestamps.modified(target),
        ) {
            (Some(source), Some(target)) => target >= source,
            _ => false,
        }
    }
}

/// Never skips anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysStale;

impl Freshness for AlwaysStale {
    fn is_fresh(&self, _: &Utf8Path, _: &Utf8Path) -> bool {
        false
    }
}

/// Skips a source when its output exists and the source's BLAKE3 digest is
/// the one recorded the last time that output was written. The digests are
/// kept in a CBOR manifest, so they survive restarts.
#[derive(Debug)]
pub struct ContentDigest {
    manifest: Utf8PathBuf,
    entries: Mutex<BTreeMap<Utf8PathBuf, Hash32>>,
}

impl ContentDigest {
    /// Opens the manifest at `path`. A missing or unreadable manifest starts empty.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        let manifest = path.into();

        let entries = match fs::File::open(&manifest) {
            Ok(file) => ciborium::from_reader(std::io::BufReader::new(file)).unwrap_or_else(|e| {
                tracing::warn!(%manifest, "discarding unreadable digest manifest: {e}");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self {
            manifest,
            entries: Mutex::new(entries),
        }
    }

    fn save(&self, entries: &BTreeMap<Utf8PathBuf, Hash32>) -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        ciborium::into_writer(entries, &mut buffer)?;
        crate::io::write_atomic(&self.manifest, &buffer)?;
        Ok(())
    }
}

impl Freshness for ContentDigest {
    fn is_fresh(&self, source: &Utf8Path, target: &Utf8Path) -> bool {
        if !target.exists() {
            return false;
        }

        let Ok(hash) = Hash32::hash_file(source) else {
            return false;
        };

        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(source) == Some(&hash)
    }

    fn record(&self, source: &Utf8Path, _: &Utf8Path) {
        let Ok(hash) = Hash32::hash_file(source) else {
            return;
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(source.to_path_buf(), hash);

        if let Err(e) = self.save(&entries) {
            tracing::warn!(manifest = %self.manifest, "couldn't save digest manifest: {e}");
        }
    }
}
