use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::CacheError;
use crate::source::ContentSource;

/// Lifecycle state of a single entry's backing file.
///
/// The only forward transition is `Uncreated -> Populated`, performed by
/// exactly one population event. `Evicted` is terminal: an evicted entry is
/// never reused, a fresh [`CacheEntry`] is created if the same key is
/// requested again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryState {
    /// The backing file has no valid contents yet.
    Uncreated,
    /// The backing file holds the fully produced contents.
    Populated,
    /// The entry has been removed from the cache.
    Evicted,
}

/// What a single [`CacheEntry::stream`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamOutcome {
    /// The backing file was already populated and was streamed as-is.
    Hit,
    /// This call ran the producer to populate the backing file first.
    Created,
    /// The entry was evicted before the read could start. Nothing was
    /// written to the sink; the caller must start over with a fresh entry.
    Evicted,
}

/// The lifecycle record and backing file of one cache key.
///
/// Each entry owns its state and file independently of all other entries,
/// guarded by one read/write lock. Readers stream the file under a shared
/// hold, population and eviction take the lock exclusively. The exclusive
/// hold is never kept across the read itself, so an arbitrary number of
/// readers can stream a populated entry concurrently.
pub(crate) struct CacheEntry {
    /// Backing file path. Assigned once, stable for the entry's life.
    path: PathBuf,
    state: RwLock<EntryState>,
}

impl CacheEntry {
    pub(crate) fn new(path: PathBuf) -> Self {
        CacheEntry {
            path,
            state: RwLock::new(EntryState::Uncreated),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Streams the full contents of the backing file into `sink`, running
    /// the producer first if the file is not populated yet.
    ///
    /// Returns [`StreamOutcome::Evicted`] without touching `sink` when the
    /// entry was evicted between the caller's index lookup and the read.
    pub(crate) fn stream(
        &self,
        sink: &mut dyn Write,
        source: &mut dyn ContentSource,
    ) -> Result<StreamOutcome, CacheError> {
        let was_created = self.ensure_populated(source)?;

        let state = self.state.read();
        if *state == EntryState::Evicted {
            return Ok(StreamOutcome::Evicted);
        }

        // The shared hold blocks out `delete`, so the file cannot disappear
        // underneath this read.
        let file = File::open(&self.path)?;
        io::copy(&mut BufReader::new(file), sink)?;

        Ok(if was_created {
            StreamOutcome::Created
        } else {
            StreamOutcome::Hit
        })
    }

    /// Makes sure the backing file holds valid contents, returning whether
    /// this call performed the population.
    ///
    /// The check/demote/recheck sequence runs in a single exclusive critical
    /// section, so concurrent first-time accesses race safely: only one of
    /// them runs the producer, the others fall through to the read.
    fn ensure_populated(&self, source: &mut dyn ContentSource) -> Result<bool, CacheError> {
        {
            let state = self.state.read();
            match *state {
                // The file can disappear out-of-band (e.g. an external
                // cleanup job); only trust `Populated` while it is there.
                EntryState::Populated if self.path.exists() => return Ok(false),
                // Left to the read step, which reports the retry signal.
                EntryState::Evicted => return Ok(false),
                _ => {}
            }
        }

        let mut state = self.state.write();

        if *state == EntryState::Populated && !self.path.exists() {
            tracing::debug!(
                path = %self.path.display(),
                "backing file disappeared out-of-band, regenerating"
            );
            *state = EntryState::Uncreated;
        }

        // Another thread may have raced ahead and populated (or the entry
        // got evicted) while we were waiting for the exclusive lock.
        if *state != EntryState::Uncreated {
            return Ok(false);
        }

        match self.write_contents(source) {
            Ok(()) => {
                *state = EntryState::Populated;
                Ok(true)
            }
            Err(e) => {
                // Do not leave a partial write behind; the next attempt
                // starts from a clean `Uncreated` entry.
                if let Err(e) = fs::remove_file(&self.path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::error!(
                            error = &e as &dyn std::error::Error,
                            path = %self.path.display(),
                            "Failed to remove partially populated cache file",
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn write_contents(&self, source: &mut dyn ContentSource) -> Result<(), CacheError> {
        tracing::debug!(path = %self.path.display(), "populating cache file");
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        source.produce(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Evicts this entry and removes its backing file.
    ///
    /// Blocks until all in-flight reads of this entry have finished. Calling
    /// this more than once is harmless; only the first call takes effect.
    pub(crate) fn delete(&self) {
        let mut state = self.state.write();
        if *state == EntryState::Evicted {
            tracing::debug!(path = %self.path.display(), "entry already evicted");
            return;
        }
        *state = EntryState::Evicted;

        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %self.path.display(),
                    "Failed to remove evicted cache file",
                );
            }
        }
    }
}
