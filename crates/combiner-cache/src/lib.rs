//! # Combiner caching infrastructure
//!
//! Combining and transforming static web resources (concatenation,
//! minification) is expensive enough that doing it on every request is not an
//! option. This crate contains the disk-backed cache the resource-serving
//! layer puts in front of that work: callers identify content by an opaque
//! key and supply a [`ContentSource`] able to produce the bytes; the cache
//! either streams a previously materialized copy from its scratch directory
//! or runs the producer exactly once to materialize one, then streams that.
//!
//! ## Lifecycle
//!
//! Every key maps to at most one live entry, and every entry walks a one-way
//! street: `Uncreated` (registered, no contents yet) to `Populated` (backing
//! file holds the produced bytes) to `Evicted` (terminal; the file is gone).
//! Population happens lazily on first access and is guarded so that
//! concurrent first-time readers race safely with only one of them running
//! the producer. Eviction is driven purely by entry count: the cache holds a
//! configured number of entries and removes the least-recently-used one when
//! a new entry pushes it over, where "used" means any successful lookup, not
//! just insertion.
//!
//! ## Locking discipline
//!
//! Two kinds of locks exist and they never nest across file I/O:
//!
//! - The coarse index lock covers key-to-entry lookup, insertion and
//!   access-order maintenance. It is held for map bookkeeping only.
//! - Each entry carries its own read/write lock. Readers stream the backing
//!   file under a shared hold; population and eviction take it exclusively.
//!
//! Because eviction must wait for the victim's exclusive lock, a reader that
//! already started streaming always finishes with intact output, while a
//! reader arriving after eviction completed observes the terminal state and
//! signals the cache to start over with a fresh entry. That retry signal is
//! internal; callers of [`DiskCache::stream`] only ever see a hit, a miss,
//! or a real error.
//!
//! ## Persistence
//!
//! There is none. The scratch directory is wiped and recreated at
//! construction and is exclusively owned by one cache instance; backing
//! files are named by a process-lifetime-unique counter. A restart starts
//! cold by design.
//!
//! For completeness there is also [`PassthroughCache`], which implements the
//! same [`ResourceCache`] contract by invoking the producer on every call
//! and storing nothing.

mod disk;
mod entry;
mod error;
mod source;


pub use disk::{CacheStats, DiskCache};
pub use error::CacheError;
pub use source::{ContentSource, PassthroughCache, ResourceCache};
