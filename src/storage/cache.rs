//! Two-tier cache backing the S3 backend: an in-memory LRU (L1) and an
//! on-disk LRU (L2). A read hit in L1 does not touch L2; an L2 hit
//! populates L1. Any successful write invalidates both tiers for that path.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

const DEFAULT_L1_MAX_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_L1_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_L2_MAX_BYTES: u64 = 1024 * 1024 * 1024;
const DEFAULT_L2_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const L2_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

struct CacheEntry {
    bytes: Vec<u8>,
    inserted_at: Instant,
}

struct L1State {
    entries: LruCache<String, CacheEntry>,
    max_bytes: u64,
    current_bytes: u64,
    ttl: Duration,
}

pub struct MemoryCache {
    state: Mutex<L1State>,
}

impl MemoryCache {
    pub fn new(max_bytes: u64, ttl: Duration) -> Self {
        MemoryCache {
            state: Mutex::new(L1State {
                entries: LruCache::unbounded(),
                max_bytes,
                current_bytes: 0,
                ttl,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_L1_MAX_BYTES, DEFAULT_L1_TTL)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let mut state = self.state.lock().expect("L1 cache mutex poisoned");
        let ttl = state.ttl;
        let expired = match state.entries.get(path) {
            Some(entry) if entry.inserted_at.elapsed() <= ttl => return Some(entry.bytes.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some(old) = state.entries.pop(path) {
                state.current_bytes = state.current_bytes.saturating_sub(old.bytes.len() as u64);
            }
        }
        None
    }

    pub fn put(&self, path: &str, bytes: Vec<u8>) {
        let mut state = self.state.lock().expect("L1 cache mutex poisoned");
        let size = bytes.len() as u64;
        if let Some(old) = state.entries.pop(path) {
            state.current_bytes = state.current_bytes.saturating_sub(old.bytes.len() as u64);
        }
        while state.current_bytes + size > state.max_bytes {
            match state.entries.pop_lru() {
                Some((_, evicted)) => {
                    state.current_bytes = state.current_bytes.saturating_sub(evicted.bytes.len() as u64);
                }
                None => break,
            }
        }
        state.current_bytes += size;
        state.entries.put(
            path.to_string(),
            CacheEntry {
                bytes,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, path: &str) {
        let mut state = self.state.lock().expect("L1 cache mutex poisoned");
        if let Some(old) = state.entries.pop(path) {
            state.current_bytes = state.current_bytes.saturating_sub(old.bytes.len() as u64);
        }
    }
}

/// On-disk LRU, keyed by a content-addressed filename under `dir`.
pub struct DiskCache {
    dir: PathBuf,
    max_bytes: u64,
    ttl: Duration,
    order: Mutex<LruCache<String, ()>>,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64, ttl: Duration) -> Self {
        DiskCache {
            dir: dir.into(),
            max_bytes,
            ttl,
            order: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn with_defaults(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_L2_MAX_BYTES, DEFAULT_L2_TTL)
    }

    fn entry_path(&self, path: &str) -> PathBuf {
        let key = blake3::hash(path.as_bytes()).to_hex().to_string();
        self.dir.join(key)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let entry_path = self.entry_path(path);
        let meta = std::fs::metadata(&entry_path).ok()?;
        let modified = meta.modified().ok()?;
        if modified.elapsed().ok()? > self.ttl {
            let _ = std::fs::remove_file(&entry_path);
            return None;
        }
        let bytes = std::fs::read(&entry_path).ok()?;
        self.order.lock().expect("disk cache order mutex poisoned").put(path.to_string(), ());
        Some(bytes)
    }

    pub fn put(&self, path: &str, bytes: &[u8]) {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        let entry_path = self.entry_path(path);
        if std::fs::write(&entry_path, bytes).is_err() {
            return;
        }
        let mut order = self.order.lock().expect("disk cache order mutex poisoned");
        order.put(path.to_string(), ());
        self.enforce_budget(&mut order);
    }

    pub fn invalidate(&self, path: &str) {
        let entry_path = self.entry_path(path);
        let _ = std::fs::remove_file(&entry_path);
        self.order.lock().expect("disk cache order mutex poisoned").pop(path);
    }

    fn enforce_budget(&self, order: &mut LruCache<String, ()>) {
        let mut total: u64 = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);
        while total > self.max_bytes {
            let Some((key, _)) = order.pop_lru() else { break };
            let path = self.dir.join(blake3::hash(key.as_bytes()).to_hex().to_string());
            if let Ok(meta) = std::fs::metadata(&path) {
                total = total.saturating_sub(meta.len());
            }
            let _ = std::fs::remove_file(path);
        }
    }

    /// Removes entries whose on-disk mtime has exceeded the TTL. Intended
    /// to be called periodically (every [`L2_SWEEP_INTERVAL`]) by a
    /// background task the backend owns.
    pub fn sweep(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            if modified.elapsed().map(|age| age > self.ttl).unwrap_or(false) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

/// Combines an in-memory L1 and an on-disk L2: an L2 hit populates L1; an
/// L1 hit never touches L2.
pub struct TieredCache {
    pub memory: MemoryCache,
    pub disk: Option<DiskCache>,
}

impl TieredCache {
    pub fn memory_only() -> Self {
        TieredCache {
            memory: MemoryCache::with_defaults(),
            disk: None,
        }
    }

    pub fn with_disk(disk_dir: impl Into<PathBuf>) -> Self {
        TieredCache {
            memory: MemoryCache::with_defaults(),
            disk: Some(DiskCache::with_defaults(disk_dir)),
        }
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.memory.get(path) {
            return Some(bytes);
        }
        let disk = self.disk.as_ref()?;
        let bytes = disk.get(path)?;
        self.memory.put(path, bytes.clone());
        Some(bytes)
    }

    pub fn put(&self, path: &str, bytes: Vec<u8>) {
        if let Some(disk) = &self.disk {
            disk.put(path, &bytes);
        }
        self.memory.put(path, bytes);
    }

    pub fn invalidate(&self, path: &str) {
        self.memory.invalidate(path);
        if let Some(disk) = &self.disk {
            disk.invalidate(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_evicts_least_recently_used_over_budget() {
        let cache = MemoryCache::new(10, Duration::from_secs(60));
        cache.put("a", vec![0u8; 6]);
        cache.put("b", vec![0u8; 6]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn memory_cache_expires_entries_past_ttl() {
        let cache = MemoryCache::new(1024, Duration::from_millis(1));
        cache.put("a", vec![1, 2, 3]);
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn disk_cache_round_trips_and_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::with_defaults(dir.path());
        cache.put("notes/a.md", b"hello");
        assert_eq!(cache.get("notes/a.md"), Some(b"hello".to_vec()));
        cache.invalidate("notes/a.md");
        assert!(cache.get("notes/a.md").is_none());
    }

    #[test]
    fn tiered_cache_populates_l1_from_l2_hit() {
        let dir = tempfile::tempdir().unwrap();
        let tiered = TieredCache::with_disk(dir.path());
        tiered.disk.as_ref().unwrap().put("a", b"data");
        assert!(tiered.memory.get("a").is_none());
        assert_eq!(tiered.get("a"), Some(b"data".to_vec()));
        assert!(tiered.memory.get("a").is_some());
    }

    #[test]
    fn write_invalidates_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let tiered = TieredCache::with_disk(dir.path());
        tiered.put("a", b"data".to_vec());
        tiered.invalidate("a");
        assert!(tiered.memory.get("a").is_none());
        assert!(tiered.disk.as_ref().unwrap().get("a").is_none());
    }
}
