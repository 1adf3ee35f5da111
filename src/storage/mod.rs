//! Response Storage
//!
//! Durable storage for external-call responses using Sled DB, plus an
//! in-memory backend with the same contract for tests.

pub mod response_cache;

pub use response_cache::{
    CacheEntry, CacheError, CacheStats, InMemoryResponseCache, ResponseCache, SledResponseCache,
    validate_namespace,
};

use std::sync::Arc;

use crate::config::{CacheBackend, CacheConfig};

/// Build the cache backend selected by configuration.
///
/// Returns `None` when caching is disabled.
pub fn open_from_config(config: &CacheConfig) -> Result<Option<Arc<dyn ResponseCache>>, CacheError> {
    if !config.enabled {
        return Ok(None);
    }
    let cache: Arc<dyn ResponseCache> = match config.backend {
        CacheBackend::Sled => Arc::new(SledResponseCache::open(&config.dir, &config.namespace)?),
        CacheBackend::Memory => Arc::new(InMemoryResponseCache::new()),
    };
    Ok(Some(cache))
}
