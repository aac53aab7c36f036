//! # Probe Caching
//!
//! This module provides the two caching layers the resolver relies on to
//! avoid redundant work:
//!
//! 1.  **Persistent probe cache**: memoizes [`ProbeResult`]s keyed by path
//!     and last-write-time. It is loaded from a state file at startup and,
//!     when dirty, atomically rewritten at shutdown, so repeated builds skip
//!     every metadata decode for unchanged files.
//!
//! 2.  **Per-invocation filesystem memos**: directory listings and
//!     file-existence checks are remembered for the duration of one resolver
//!     invocation. These are never persisted; they only stop the candidate
//!     search from issuing the same syscalls over and over.
//!
//! The cache is shared across the probe worker pool with a reader-writer
//! discipline: lookups take the read lock and only a stale or missing entry
//! escalates to a write.
//!
//! ## State file
//!
//! Versioned little-endian binary stream:
//! `magic(4) | version(u8) | entries(u32) | { path_len(u16), path_utf8,
//! mtime_i64, probe_len(u32), probe_blob }*` where `probe_blob` is the
//! bincode encoding of the probe result. A mismatched magic or version
//! discards the file. Entries are written in path order so that
//! serialize → deserialize → serialize is byte-identical.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::metadata::{MetadataProbe, ProbeResult};

const STATE_FILE_MAGIC: [u8; 4] = *b"RSLV";
const STATE_FILE_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct CacheEntry {
    mtime: i64,
    probe: ProbeResult,
}

/// Thread-safe probe cache with optional persistence.
pub struct ProbeCache {
    probe: Box<dyn MetadataProbe>,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    dir_listings: RwLock<HashMap<PathBuf, Arc<Vec<String>>>>,
    existence: RwLock<HashMap<PathBuf, bool>>,
    dirty: AtomicBool,
    probes: AtomicU64,
    hits: AtomicU64,
}

impl ProbeCache {
    /// Empty cache delegating misses to `probe`.
    pub fn new(probe: Box<dyn MetadataProbe>) -> Self {
        Self {
            probe,
            entries: RwLock::new(HashMap::new()),
            dir_listings: RwLock::new(HashMap::new()),
            existence: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            probes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Load a cache from a state file.
    ///
    /// A missing file yields an empty cache silently; an unreadable or
    /// corrupt file yields an empty cache plus an advisory message for the
    /// decision log. Neither case is fatal.
    pub fn load(probe: Box<dyn MetadataProbe>, state_file: &Path) -> (Self, Option<String>) {
        let cache = Self::new(probe);
        let data = match std::fs::read(state_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (cache, None),
            Err(e) => {
                return (
                    cache,
                    Some(format!(
                        "state file {} unreadable, starting with an empty cache: {e}",
                        state_file.display()
                    )),
                )
            }
        };
        match deserialize_entries(&data) {
            Ok(entries) => {
                *cache.entries.write() = entries;
                (cache, None)
            }
            Err(e) => (
                cache,
                Some(format!(
                    "state file {} discarded, starting with an empty cache: {e}",
                    state_file.display()
                )),
            ),
        }
    }

    /// Probe `path`, reusing the cached result when the file's
    /// last-write-time is unchanged.
    pub fn lookup(&self, path: &Path) -> Result<ProbeResult> {
        let mtime = file_mtime(path)?;
        if let Some(entry) = self.entries.read().get(path) {
            if entry.mtime == mtime {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.probe.clone());
            }
        }
        self.probes.fetch_add(1, Ordering::Relaxed);
        let probe = self.probe.probe(path)?;
        self.entries.write().insert(
            path.to_path_buf(),
            CacheEntry {
                mtime,
                probe: probe.clone(),
            },
        );
        self.dirty.store(true, Ordering::Release);
        Ok(probe)
    }

    /// Memoized directory listing: file names sorted case-insensitively.
    /// A missing or unreadable directory lists as empty.
    pub fn list_dir(&self, dir: &Path) -> Arc<Vec<String>> {
        if let Some(listing) = self.dir_listings.read().get(dir) {
            return Arc::clone(listing);
        }
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default();
        names.sort_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
        let listing = Arc::new(names);
        self.dir_listings
            .write()
            .insert(dir.to_path_buf(), Arc::clone(&listing));
        listing
    }

    /// Memoized file-existence probe.
    pub fn file_exists(&self, path: &Path) -> bool {
        if let Some(&exists) = self.existence.read().get(path) {
            return exists;
        }
        let exists = path.is_file();
        self.existence.write().insert(path.to_path_buf(), exists);
        exists
    }

    /// True when an entry was added or replaced since load/flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of real metadata decodes performed.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    /// Number of lookups answered from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().len() == 0
    }

    /// Paths and mtimes of every entry, in path order (for `cache show`).
    pub fn entries_summary(&self) -> Vec<(PathBuf, i64)> {
        let entries = self.entries.read();
        let mut summary: Vec<(PathBuf, i64)> = entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.mtime))
            .collect();
        summary.sort();
        summary
    }

    /// Serialize the cache to the state-file format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let entries = self.entries.read();
        let mut sorted: Vec<(&PathBuf, &CacheEntry)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = Vec::new();
        out.extend_from_slice(&STATE_FILE_MAGIC);
        out.push(STATE_FILE_VERSION);
        out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
        for (path, entry) in sorted {
            let path_utf8 = path.to_string_lossy();
            let path_bytes = path_utf8.as_bytes();
            if path_bytes.len() > u16::MAX as usize {
                return Err(Error::StateFile {
                    message: format!("path too long to serialize: {}", path.display()),
                });
            }
            let blob = bincode::serialize(&entry.probe).map_err(|e| Error::StateFile {
                message: format!("failed to encode probe result: {e}"),
            })?;
            out.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(path_bytes);
            out.extend_from_slice(&entry.mtime.to_le_bytes());
            out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            out.extend_from_slice(&blob);
        }
        Ok(out)
    }

    /// Atomically replace `state_file` with a snapshot if the cache is
    /// dirty. Returns true when the file was written.
    pub fn flush(&self, state_file: &Path) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let bytes = self.to_bytes()?;
        let dir = state_file.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.persist(state_file).map_err(|e| Error::StateFile {
            message: format!("failed to replace {}: {}", state_file.display(), e.error),
        })?;
        self.dirty.store(false, Ordering::Release);
        Ok(true)
    }
}

fn deserialize_entries(data: &[u8]) -> Result<HashMap<PathBuf, CacheEntry>> {
    let corrupt = |message: String| Error::StateFile { message };
    if data.len() < 9 {
        return Err(corrupt("truncated header".to_string()));
    }
    if data[0..4] != STATE_FILE_MAGIC {
        return Err(corrupt("bad magic".to_string()));
    }
    if data[4] != STATE_FILE_VERSION {
        return Err(corrupt(format!("unsupported version {}", data[4])));
    }
    let count = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
    let mut entries = HashMap::with_capacity(count.min(4096));
    let mut pos = 9;
    fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
        match pos.checked_add(n).filter(|&end| end <= data.len()) {
            Some(end) => {
                let slice = &data[*pos..end];
                *pos = end;
                Ok(slice)
            }
            None => Err(Error::StateFile {
                message: "truncated entry".to_string(),
            }),
        }
    }
    for _ in 0..count {
        let path_len = {
            let b = take(data, &mut pos, 2)?;
            u16::from_le_bytes([b[0], b[1]]) as usize
        };
        let path = String::from_utf8(take(data, &mut pos, path_len)?.to_vec())
            .map_err(|_| corrupt("path is not UTF-8".to_string()))?;
        let mtime = {
            let b = take(data, &mut pos, 8)?;
            i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        };
        let blob_len = {
            let b = take(data, &mut pos, 4)?;
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
        };
        let probe: ProbeResult = bincode::deserialize(take(data, &mut pos, blob_len)?)
            .map_err(|e| corrupt(format!("bad probe blob: {e}")))?;
        entries.insert(PathBuf::from(path), CacheEntry { mtime, probe });
    }
    if pos != data.len() {
        return Err(corrupt("trailing bytes after last entry".to_string()));
    }
    Ok(entries)
}

/// Last-write-time in nanoseconds since the epoch.
pub fn file_mtime(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as i64,
        Err(before) => -(before.duration().as_nanos() as i64),
    })
}
