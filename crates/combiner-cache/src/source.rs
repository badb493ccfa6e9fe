use std::io::{self, Write};

use crate::error::CacheError;

/// A one-shot producer of cacheable content.
///
/// The resource-serving layer supplies one of these per request. If the cache
/// decides to materialize an entry, the producer is invoked at most once per
/// population event and must write the *entire* logical payload into the sink
/// before returning. Returning an error aborts the population; nothing of the
/// partial write survives.
///
/// Any `FnMut(&mut dyn Write) -> io::Result<()>` closure is a valid source.
pub trait ContentSource {
    fn produce(&mut self, sink: &mut dyn Write) -> io::Result<()>;
}

impl<F> ContentSource for F
where
    F: FnMut(&mut dyn Write) -> io::Result<()>,
{
    fn produce(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        self(sink)
    }
}

/// The public contract shared by all cache implementations.
pub trait ResourceCache {
    /// Streams the content identified by `key` into `sink`, materializing it
    /// via `source` first if necessary.
    ///
    /// Returns `true` if the content was served from a previously
    /// materialized copy.
    fn stream(
        &self,
        key: &str,
        sink: &mut dyn Write,
        source: &mut dyn ContentSource,
    ) -> Result<bool, CacheError>;
}

/// A cache that does not cache.
///
/// Invokes the producer directly on every call and reports every call as a
/// miss. Useful for development setups and for exercising the consuming layer
/// without a scratch directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCache;

impl ResourceCache for PassthroughCache {
    fn stream(
        &self,
        _key: &str,
        sink: &mut dyn Write,
        source: &mut dyn ContentSource,
    ) -> Result<bool, CacheError> {
        source.produce(sink)?;
        Ok(false)
    }
}
