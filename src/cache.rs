// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Process-safe on-disk memoization for expensive signal extraction.
//!
//! One JSON object per namespace ("ocr", "vision", "transcription",
//! "summaries") under `.cache/`, guarded by an advisory file lock so
//! concurrent workers and separate invocations never corrupt the store.
//! Entries are keyed by a content hash of the file bytes, or by a hash of
//! the exact prompt for LLM-call caches, and are never invalidated: a key,
//! once written, always maps to the same value.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::Result;

/// Chunk size for streamed content hashing
const HASH_CHUNK_SIZE: usize = 8192;

/// Markers that identify the project root during upward discovery
const ROOT_MARKERS: &[&str] = &["config.json", ".git"];

/// One cache namespace backed by a single JSON file
pub struct ContentHashCache {
    namespace: String,
    file_path: PathBuf,
    lock_path: PathBuf,
}

/// Holds the lock file open; the OS drops the advisory lock when the
/// descriptor closes, so the guard going out of scope is the unlock.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl ContentHashCache {
    /// Open (creating if needed) the cache namespace under `cache_dir`
    pub fn open(cache_dir: &Path, namespace: &str) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;

        let cache = Self {
            namespace: namespace.to_string(),
            file_path: cache_dir.join(format!("{}.json", namespace)),
            lock_path: cache_dir.join(format!("{}.json.lock", namespace)),
        };

        // First-time creation happens under the lock too, and re-checks
        // after acquisition in case another process won the race.
        if !cache.file_path.exists() {
            let _guard = cache.acquire_lock()?;
            if !cache.file_path.exists() {
                cache.write_map(&HashMap::new())?;
            }
        }

        Ok(cache)
    }

    /// Look up a cached value. Any I/O or parse failure is logged and
    /// reported as a miss; the cache never fails a pipeline.
    pub fn get(&self, key: &str) -> Option<String> {
        let _guard = match self.acquire_lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Could not lock {} cache: {}", self.namespace, e);
                return None;
            }
        };

        match self.read_map() {
            Ok(map) => map.get(key).cloned(),
            Err(e) => {
                warn!("Could not read {} cache: {}", self.namespace, e);
                None
            }
        }
    }

    /// Persist a value idempotently. Failures are logged and swallowed;
    /// the entry is simply recomputed next run.
    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.try_set(key, value) {
            warn!("Could not write {} cache: {}", self.namespace, e);
        }
    }

    fn try_set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.acquire_lock()?;

        // A corrupt store is treated as empty and overwritten, which heals
        // it at the cost of the lost entries.
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                warn!("Rebuilding corrupt {} cache: {}", self.namespace, e);
                HashMap::new()
            }
        };

        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    /// Number of entries and file size on disk
    pub fn stats(&self) -> Result<(usize, u64)> {
        let _guard = self.acquire_lock()?;
        let map = self.read_map()?;
        let size = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        Ok((map.len(), size))
    }

    /// Blocks until the namespace lock is held
    fn acquire_lock(&self) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(LockGuard { file })
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        if !self.file_path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.file_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Whole-file rewrite through a temp file and atomic rename, so a
    /// crashed writer never leaves a half-written store behind.
    fn write_map(&self, map: &HashMap<String, String>) -> Result<()> {
        let tmp_path = self.file_path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(map)?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.file_path)?;
        Ok(())
    }
}

/// Content hash of a file's full byte stream, read in fixed-size chunks to
/// bound memory on large media files
pub fn content_key(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Cache key for an LLM call: a hash of the exact prompt text, so any
/// change to embedded context produces a new key
pub fn prompt_key(prompt: &str) -> String {
    blake3::hash(prompt.as_bytes()).to_hex().to_string()
}

/// Walk upward from the current directory looking for a project marker;
/// fall back to the invocation directory itself
pub fn find_project_root() -> PathBuf {
    let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut current = start.clone();
    loop {
        if ROOT_MARKERS.iter().any(|m| current.join(m).exists()) {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return start,
        }
    }
}

/// Default cache directory: `.cache` under the discovered project root
pub fn default_cache_dir() -> PathBuf {
    find_project_root().join(".cache")
}

/// Remove leftover lock files from crashed runs. Best-effort only, run at
/// the start of a batch: a lock deleted while a previous, still-running
/// invocation holds it is a known race this sweep does not guard against.
pub fn cleanup_stale_locks(cache_dir: &Path) -> usize {
    if !cache_dir.exists() {
        return 0;
    }

    let mut removed = 0;
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not scan cache directory {:?}: {}", cache_dir, e);
            return 0;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("lock") {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Cleaned up stale lock file: {:?}", path.file_name());
                    removed += 1;
                }
                Err(e) => {
                    warn!("Could not remove {:?}: {}", path.file_name(), e);
                }
            }
        }
    }

    removed
}

/// Entry count and on-disk size for every namespace present in `cache_dir`
pub fn namespace_stats(cache_dir: &Path) -> Result<Vec<(String, usize, u64)>> {
    let mut stats = Vec::new();

    if !cache_dir.exists() {
        return Ok(stats);
    }

    for entry in fs::read_dir(cache_dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(namespace) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let cache = ContentHashCache::open(cache_dir, namespace)?;
        let (entries, size) = cache.stats()?;
        stats.push((namespace.to_string(), entries, size));
    }

    stats.sort();
    Ok(stats)
}

/// Delete one namespace, or every namespace when none is given
pub fn clear(cache_dir: &Path, namespace: Option<&str>) -> Result<usize> {
    if !cache_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(cache_dir)?.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        let matches = match namespace {
            Some(ns) => {
                name == format!("{}.json", ns) || name == format!("{}.json.lock", ns)
            }
            None => name.ends_with(".json") || name.ends_with(".lock"),
        };

        if matches {
            fs::remove_file(&path)?;
            if name.ends_with(".json") {
                removed += 1;
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn set_then_get_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentHashCache::open(dir.path(), "summaries").unwrap();

        cache.set("key1", "a cached summary");

        assert_eq!(cache.get("key1"), Some("a cached summary".to_string()));
        assert_eq!(cache.get("key1"), Some("a cached summary".to_string()));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn value_survives_reopening_the_namespace() {
        let dir = tempfile::tempdir().unwrap();

        {
            let cache = ContentHashCache::open(dir.path(), "ocr").unwrap();
            cache.set("k", "v");
        }

        // Second handle simulates another process on the same store
        let reopened = ContentHashCache::open(dir.path(), "ocr").unwrap();
        assert_eq!(reopened.get("k"), Some("v".to_string()));
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = ContentHashCache::open(dir.path(), "ocr").unwrap();
        let vision = ContentHashCache::open(dir.path(), "vision").unwrap();

        ocr.set("k", "ocr value");

        assert_eq!(vision.get("k"), None);
        assert_eq!(ocr.get("k"), Some("ocr value".to_string()));
    }

    #[test]
    fn content_key_is_deterministic_and_byte_sensitive() {
        let dir = tempfile::tempdir().unwrap();

        let path_a = dir.path().join("a.bin");
        let mut file = File::create(&path_a).unwrap();
        // Spans multiple hash chunks
        file.write_all(&vec![0xAB; HASH_CHUNK_SIZE * 3 + 17]).unwrap();
        drop(file);

        let key1 = content_key(&path_a).unwrap();
        let key2 = content_key(&path_a).unwrap();
        assert_eq!(key1, key2);

        let path_b = dir.path().join("b.bin");
        let mut altered = vec![0xAB; HASH_CHUNK_SIZE * 3 + 17];
        altered[HASH_CHUNK_SIZE + 1] ^= 0x01;
        fs::write(&path_b, &altered).unwrap();

        assert_ne!(key1, content_key(&path_b).unwrap());
    }

    #[test]
    fn prompt_keys_differ_on_any_character() {
        let a = prompt_key("Summarize this: alpha");
        let b = prompt_key("Summarize this: alphb");
        assert_ne!(a, b);
        assert_eq!(a, prompt_key("Summarize this: alpha"));
    }

    #[test]
    fn corrupt_store_reads_as_miss_and_heals_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentHashCache::open(dir.path(), "transcription").unwrap();
        cache.set("old", "entry");

        fs::write(dir.path().join("transcription.json"), "{not json").unwrap();

        assert_eq!(cache.get("old"), None);

        cache.set("new", "value");
        assert_eq!(cache.get("new"), Some("value".to_string()));
    }

    #[test]
    fn stale_lock_sweep_removes_only_locks() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentHashCache::open(dir.path(), "summaries").unwrap();
        cache.set("k", "v");
        fs::write(dir.path().join("orphan.lock"), "").unwrap();

        let removed = cleanup_stale_locks(dir.path());

        assert!(removed >= 1);
        assert!(dir.path().join("summaries.json").exists());
        assert!(!dir.path().join("orphan.lock").exists());
    }

    #[test]
    fn clear_scopes_to_one_namespace() {
        let dir = tempfile::tempdir().unwrap();
        ContentHashCache::open(dir.path(), "ocr").unwrap().set("k", "v");
        ContentHashCache::open(dir.path(), "vision").unwrap().set("k", "v");

        let removed = clear(dir.path(), Some("ocr")).unwrap();

        assert_eq!(removed, 1);
        assert!(!dir.path().join("ocr.json").exists());
        assert!(dir.path().join("vision.json").exists());
    }
}
