//! In-memory file content cache with expiry

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// A cached file snapshot
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub timestamp: Instant,
}

/// TTL- and size-bounded cache keyed by canonical path
#[derive(Debug)]
pub struct FileCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl FileCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Get unexpired content; an expired entry is dropped on the way out
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        {
            let entries = self.entries.read();
            match entries.get(path) {
                None => return None,
                Some(entry) if entry.timestamp.elapsed() < self.ttl => {
                    return Some(entry.content.clone());
                }
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write();
        if entries
            .get(path)
            .is_some_and(|e| e.timestamp.elapsed() >= self.ttl)
        {
            entries.remove(path);
            tracing::debug!("Cache entry expired: {}", path.display());
        }
        None
    }

    /// Insert or replace an entry
    pub fn put(&self, path: &Path, content: Vec<u8>) {
        let mut entries = self.entries.write();
        if !entries.contains_key(path) && entries.len() >= self.capacity {
            Self::purge_oldest_half(&mut entries);
        }
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                path: path.to_path_buf(),
                content,
                timestamp: Instant::now(),
            },
        );
    }

    fn purge_oldest_half(entries: &mut HashMap<PathBuf, CacheEntry>) {
        let mut by_age: Vec<(PathBuf, Instant)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.timestamp))
            .collect();
        by_age.sort_by_key(|(_, ts)| *ts);
        let purge = by_age.len().div_ceil(2);
        for (key, _) in by_age.into_iter().take(purge) {
            entries.remove(&key);
        }
        tracing::debug!("Cache full, purged {} oldest entries", purge);
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.write().remove(path);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an unexpired entry exists, without touching it
    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .read()
            .get(path)
            .is_some_and(|e| e.timestamp.elapsed() < self.ttl)
    }
}
