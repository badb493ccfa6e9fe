use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// An error surfaced by a cache operation.
///
/// The internal "entry was evicted mid-operation, start over" signal is *not*
/// part of this enum. It is absorbed by the retry loop in
/// [`DiskCache::stream`](crate::DiskCache::stream) and never reaches callers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache was constructed with a capacity of zero entries.
    #[error("cache capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    /// The scratch directory could not be wiped and recreated.
    #[error("failed to prepare scratch directory `{path}`")]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An I/O failure while producing cache contents, reading them back, or
    /// writing them into the caller's sink.
    ///
    /// Producer errors pass through here unmodified.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A single stream call kept losing the race against eviction of its own
    /// entry and gave up retrying.
    #[error("giving up on `{0}` after repeated eviction races")]
    EvictionRaces(String),
}
