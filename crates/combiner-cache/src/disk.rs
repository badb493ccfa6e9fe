use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::entry::{CacheEntry, StreamOutcome};
use crate::error::CacheError;
use crate::source::{ContentSource, ResourceCache};

/// File-name suffix for backing files in the scratch directory.
const FILE_SUFFIX: &str = "cache";

/// How often a single `stream` call is willing to lose the race against
/// eviction of its own entry before giving up.
///
/// Each retry re-registers the key as most-recently-used, so losing the race
/// even twice in a row takes adversarial scheduling. The bound exists so a
/// hot key on a capacity-1 cache cannot spin a caller forever.
const MAX_EVICTION_RETRIES: usize = 32;

/// Key -> entry index with LRU access-order tracking.
///
/// The `LruCache` is created unbounded; capacity is enforced by
/// [`DiskCache::enforce_capacity`] instead, because a victim must go through
/// [`CacheEntry::delete`] rather than being silently dropped.
struct Index {
    entries: LruCache<String, Arc<CacheEntry>>,
    /// Allocator for backing filenames, `<n>.cache`. Monotonic over the
    /// cache's life, so no two live entries ever share a file.
    next_file_id: u64,
}

/// Monotonic hit/miss/eviction counters.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// A point-in-time snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Stream calls served from an already populated entry.
    pub hits: u64,
    /// Stream calls that ran the producer.
    pub misses: u64,
    /// Entries removed to enforce capacity or by [`DiskCache::clear`].
    pub evictions: u64,
}

/// A bounded, disk-backed, concurrency-safe content cache.
///
/// The cache owns an exclusive scratch directory which is wiped and
/// recreated at construction; nothing survives a process restart. Capacity
/// is counted in entries and enforced with least-recently-used eviction,
/// where every lookup (hit or creation) promotes the entry.
///
/// The coarse index lock is held only for map bookkeeping, never across
/// file I/O. All file I/O happens under the affected entry's own lock,
/// which is what keeps unrelated keys contention-free.
pub struct DiskCache {
    scratch_dir: PathBuf,
    capacity: usize,
    index: Mutex<Index>,
    counters: Counters,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("scratch_dir", &self.scratch_dir)
            .field("capacity", &self.capacity)
            .field("entries", &self.entry_count())
            .finish()
    }
}

impl DiskCache {
    /// Creates a cache holding at most `capacity` entries under
    /// `scratch_dir`.
    ///
    /// The directory is wiped and recreated: it must be exclusively owned by
    /// this cache instance for the process lifetime.
    pub fn new(scratch_dir: impl Into<PathBuf>, capacity: usize) -> Result<Self, CacheError> {
        if capacity < 1 {
            return Err(CacheError::InvalidCapacity(capacity));
        }

        let scratch_dir = scratch_dir.into();
        if let Err(e) = fs::remove_dir_all(&scratch_dir) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(CacheError::Scratch {
                    path: scratch_dir,
                    source: e,
                });
            }
        }
        if let Err(e) = fs::create_dir_all(&scratch_dir) {
            return Err(CacheError::Scratch {
                path: scratch_dir,
                source: e,
            });
        }
        tracing::debug!(path = %scratch_dir.display(), capacity, "created disk cache");

        Ok(DiskCache {
            scratch_dir,
            capacity,
            index: Mutex::new(Index {
                entries: LruCache::unbounded(),
                next_file_id: 0,
            }),
            counters: Counters::default(),
        })
    }

    /// Streams the content identified by `key` into `sink`.
    ///
    /// On a miss, `source` is invoked to materialize the backing file first;
    /// it runs at most once per population event even under concurrent
    /// first-time access. Returns `true` if the content was served from an
    /// already populated entry.
    ///
    /// Producer and I/O errors propagate unmodified; a brand-new entry whose
    /// population failed is rolled back so the next call starts clean.
    pub fn stream(
        &self,
        key: &str,
        sink: &mut dyn Write,
        source: &mut dyn ContentSource,
    ) -> Result<bool, CacheError> {
        for _ in 0..MAX_EVICTION_RETRIES {
            let (entry, is_new) = self.lookup_or_insert(key)?;

            let outcome = match entry.stream(sink, source) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if is_new {
                        self.rollback(key, &entry);
                    }
                    return Err(e);
                }
            };

            // A hit cannot grow the index, so the hot path skips this
            // entirely.
            if is_new {
                self.enforce_capacity();
            }

            match outcome {
                StreamOutcome::Hit => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(true);
                }
                StreamOutcome::Created => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(false);
                }
                StreamOutcome::Evicted => {
                    tracing::trace!(key, "entry evicted mid-stream, retrying");
                }
            }
        }

        Err(CacheError::EvictionRaces(key.to_owned()))
    }

    /// Evicts every entry, deleting all backing files.
    ///
    /// In-flight readers finish their streams first; callers arriving
    /// afterwards repopulate from scratch.
    pub fn clear(&self) {
        let victims: Vec<_> = {
            let mut index = self.index.lock();
            std::iter::from_fn(|| index.entries.pop_lru()).collect()
        };
        for (key, entry) in victims {
            tracing::debug!(key = %key, "dropping entry on cache clear");
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            entry.delete();
        }
    }

    /// The maximum number of entries this cache holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of entries currently in the index.
    pub fn entry_count(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// The scratch directory this cache owns.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// A snapshot of the hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Looks up the entry for `key`, creating and registering a fresh one
    /// if absent. Either way the entry becomes most-recently-used.
    fn lookup_or_insert(&self, key: &str) -> Result<(Arc<CacheEntry>, bool), CacheError> {
        let mut index = self.index.lock();

        if let Some(entry) = index.entries.get(key) {
            return Ok((Arc::clone(entry), false));
        }

        let file_id = index.next_file_id;
        index.next_file_id += 1;
        let path = self.scratch_dir.join(format!("{file_id}.{FILE_SUFFIX}"));

        // The scratch directory is wiped at construction, so a file with
        // this name can only be junk from outside interference.
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "removed stale file occupying a fresh cache slot")
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::trace!(key, path = %path.display(), "registering new cache entry");
        let entry = Arc::new(CacheEntry::new(path));
        index.entries.put(key.to_owned(), Arc::clone(&entry));

        Ok((entry, true))
    }

    /// Unregisters a half-created entry after a failed population and
    /// deletes its backing file.
    fn rollback(&self, key: &str, entry: &Arc<CacheEntry>) {
        {
            let mut index = self.index.lock();
            // Only unregister if the index still maps the key to this very
            // entry; a concurrent eviction plus re-creation may have put a
            // different one there already.
            let ours = index
                .entries
                .peek(key)
                .is_some_and(|current| Arc::ptr_eq(current, entry));
            if ours {
                index.entries.pop(key);
            }
        }
        tracing::debug!(key, "rolling back entry after failed population");
        entry.delete();
    }

    /// Removes least-recently-used entries until the index fits the
    /// capacity again.
    ///
    /// Victims are unregistered under the coarse lock but deleted outside
    /// it: `delete` blocks on the victim's own lock until readers still
    /// mid-flight on that victim have finished, and the coarse lock must
    /// not be held across that wait.
    fn enforce_capacity(&self) {
        let mut victims = Vec::new();
        {
            let mut index = self.index.lock();
            while index.entries.len() > self.capacity {
                match index.entries.pop_lru() {
                    Some(victim) => victims.push(victim),
                    None => break,
                }
            }
        }

        for (key, entry) in victims {
            tracing::debug!(key = %key, "evicting least-recently-used entry");
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            entry.delete();
        }
    }
}

impl ResourceCache for DiskCache {
    fn stream(
        &self,
        key: &str,
        sink: &mut dyn Write,
        source: &mut dyn ContentSource,
    ) -> Result<bool, CacheError> {
        DiskCache::stream(self, key, sink, source)
    }
}
