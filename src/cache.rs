//! Content-addressed cache for transform outputs.
//!
//! Expensive steps (external commands, image optimization) store their output
//! under a SHA-256 key derived from the step configuration and the input
//! bytes. Entries are never invalidated implicitly; `aflow clear` removes the
//! whole directory.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cache failure. Never fatal: callers log it and carry on.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error on a cache path
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// What [`TransformCache::clear`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The cache directory existed and was removed
    Cleared {
        /// Number of entries that were removed
        entries: usize,
    },
    /// Nothing to remove
    Empty,
}

/// On-disk transform cache.
#[derive(Debug, Clone)]
pub struct TransformCache {
    dir: PathBuf,
    enabled: bool,
}

impl TransformCache {
    /// Create a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self { dir: dir.into(), enabled }
    }

    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self { dir: PathBuf::new(), enabled: false }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Derive a key from length-prefixed parts so `["ab", "c"]` and
    /// `["a", "bc"]` never collide.
    pub fn key(parts: &[&[u8]]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Two-level fan-out keeps directories small
        let (shard, rest) = key.split_at(2.min(key.len()));
        self.dir.join(shard).join(rest)
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        fs::read(self.entry_path(key)).ok()
    }

    /// Store an entry.
    pub fn put(&self, key: &str, contents: &[u8]) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| CacheError::Io { path: parent.to_path_buf(), source })?;
        }
        // Write then rename so a concurrent reader never sees a torn entry
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(|source| CacheError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| CacheError::Io { path: path.clone(), source })
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Store failures are logged and otherwise ignored.
    pub fn get_or_insert_with<E>(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<Vec<u8>, E>,
    ) -> Result<Vec<u8>, E> {
        if let Some(hit) = self.get(key) {
            tracing::trace!(key, "cache hit");
            return Ok(hit);
        }
        let value = compute()?;
        if let Err(e) = self.put(key, &value) {
            tracing::warn!("{}", e);
        }
        Ok(value)
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> usize {
        count_files(&self.dir)
    }

    /// Remove every entry. A missing directory is not an error.
    pub fn clear(&self) -> Result<ClearOutcome, CacheError> {
        if self.dir.as_os_str().is_empty() {
            return Ok(ClearOutcome::Empty);
        }
        let entries = count_files(&self.dir);
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(ClearOutcome::Cleared { entries }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ClearOutcome::Empty),
            Err(source) => Err(CacheError::Io { path: self.dir.clone(), source }),
        }
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_is_stable_and_length_prefixed() {
        let a = TransformCache::key(&[b"ab", b"c"]);
        let b = TransformCache::key(&[b"a", b"bc"]);
        assert_ne!(a, b);
        assert_eq!(a, TransformCache::key(&[b"ab", b"c"]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_put_then_get() {
        let temp = TempDir::new().unwrap();
        let cache = TransformCache::new(temp.path().join("cache"), true);
        let key = TransformCache::key(&[b"step", b"body"]);

        assert!(cache.get(&key).is_none());
        cache.put(&key, b"output").unwrap();
        assert_eq!(cache.get(&key), Some(b"output".to_vec()));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let temp = TempDir::new().unwrap();
        let cache = TransformCache::new(temp.path().join("cache"), false);
        let key = TransformCache::key(&[b"x"]);

        cache.put(&key, b"output").unwrap();
        assert!(cache.get(&key).is_none());
        assert!(!temp.path().join("cache").exists());
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let temp = TempDir::new().unwrap();
        let cache = TransformCache::new(temp.path().join("cache"), true);
        let key = TransformCache::key(&[b"x"]);
        let mut calls = 0;

        let first: Result<_, ()> = cache.get_or_insert_with(&key, || {
            calls += 1;
            Ok(b"computed".to_vec())
        });
        assert_eq!(first.unwrap(), b"computed");

        let second: Result<_, ()> = cache.get_or_insert_with(&key, || {
            calls += 1;
            Ok(b"other".to_vec())
        });
        assert_eq!(second.unwrap(), b"computed");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_get_or_insert_with_propagates_errors_without_storing() {
        let temp = TempDir::new().unwrap();
        let cache = TransformCache::new(temp.path().join("cache"), true);
        let key = TransformCache::key(&[b"x"]);

        let result: Result<Vec<u8>, &str> = cache.get_or_insert_with(&key, || Err("boom"));
        assert_eq!(result, Err("boom"));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_clear_removes_entries() {
        let temp = TempDir::new().unwrap();
        let cache = TransformCache::new(temp.path().join("cache"), true);
        cache.put(&TransformCache::key(&[b"a"]), b"1").unwrap();
        cache.put(&TransformCache::key(&[b"b"]), b"2").unwrap();

        assert_eq!(cache.clear().unwrap(), ClearOutcome::Cleared { entries: 2 });
        assert!(!cache.dir().exists());
    }

    #[test]
    fn test_clear_without_entries_succeeds() {
        let temp = TempDir::new().unwrap();
        let cache = TransformCache::new(temp.path().join("never-created"), true);
        assert_eq!(cache.clear().unwrap(), ClearOutcome::Empty);
        assert_eq!(TransformCache::disabled().clear().unwrap(), ClearOutcome::Empty);
    }
}
