//! ResponseCache trait - pluggable store for external-call responses
//!
//! Entries are keyed by [`CallFingerprint`] and expire lazily: an entry past
//! `stored_at + ttl` is reported as a miss but may stay on disk until
//! `purge_expired()` or `clear()` runs.
//!
//! - `SledResponseCache`: durable, one sled database per namespace directory
//! - `InMemoryResponseCache`: process-local, for tests and ephemeral runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::CallFingerprint;

// ============================================================================
// Entry
// ============================================================================

/// A cached response with its lifetime metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: CallFingerprint,
    pub response: String,
    pub stored_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: CallFingerprint, response: String, ttl: Duration) -> Self {
        Self {
            fingerprint,
            response,
            stored_at: Utc::now(),
            ttl_secs: ttl_secs_rounded_up(ttl),
        }
    }

    /// Expiry instant: `stored_at + ttl`, saturating at the maximum timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// An entry is expired once `now > stored_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Whole seconds covering `ttl`; a sub-second remainder counts as a full second.
fn ttl_secs_rounded_up(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Cache occupancy, for operators and the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache location {}: {reason}", .path.display())]
    InvalidLocation { path: PathBuf, reason: String },
    #[error("cache {} is held by another process", .path.display())]
    InUse { path: PathBuf },
    #[error("cache database error: {0}")]
    Database(#[from] sled::Error),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache lock poisoned: {0}")]
    Poisoned(String),
}

// ============================================================================
// Trait
// ============================================================================

/// Trait for response cache backends.
///
/// Implementations must be thread-safe (Send + Sync); reads and writes of a
/// single key are atomic.
pub trait ResponseCache: Send + Sync {
    /// Return the entry if present and not expired.
    fn lookup(&self, fingerprint: &CallFingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or overwrite; last writer wins.
    fn store(
        &self,
        fingerprint: &CallFingerprint,
        response: &str,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove every entry, returning how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;

    /// Count total, valid and expired entries.
    fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Physically remove expired entries, returning how many were removed.
    fn purge_expired(&self) -> Result<usize, CacheError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Sled Backend
// ============================================================================

/// Durable cache stored in its own sled database at `<dir>/<namespace>`.
///
/// sled locks a database directory exclusively, so each namespace gets a
/// separate directory. Processes using different namespaces under one
/// location never contend; two openers of the same namespace do.
#[derive(Clone)]
pub struct SledResponseCache {
    db: sled::Db,
    tree: sled::Tree,
    namespace: String,
}

/// Check that `namespace` is usable as a single directory name.
///
/// Allowed: ASCII letters, digits, `-`, `_` and `.`, not starting with `.`.
pub fn validate_namespace(namespace: &str) -> Result<(), String> {
    if namespace.is_empty() {
        return Err("namespace must not be empty".to_string());
    }
    if namespace.starts_with('.') {
        return Err(format!("namespace '{namespace}' must not start with '.'"));
    }
    if let Some(bad) = namespace
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("namespace '{namespace}' contains invalid character {bad:?}"));
    }
    Ok(())
}

impl SledResponseCache {
    /// Open or create the cache for `namespace` under `dir`.
    ///
    /// Fails if `dir` exists but is not a directory, cannot be created, the
    /// namespace is not a plain directory name, or another process already
    /// holds the same namespace.
    pub fn open<P: AsRef<Path>>(dir: P, namespace: &str) -> Result<Self, CacheError> {
        let dir = dir.as_ref();
        validate_namespace(namespace).map_err(|reason| CacheError::InvalidLocation {
            path: dir.to_path_buf(),
            reason,
        })?;
        if dir.exists() && !dir.is_dir() {
            return Err(CacheError::InvalidLocation {
                path: dir.to_path_buf(),
                reason: "path exists and is not a directory".to_string(),
            });
        }

        let db_path = dir.join(namespace);
        std::fs::create_dir_all(&db_path).map_err(|e| CacheError::InvalidLocation {
            path: db_path.clone(),
            reason: e.to_string(),
        })?;

        let db = sled::open(&db_path).map_err(|e| match e {
            sled::Error::Io(ref io) if io.kind() == std::io::ErrorKind::WouldBlock => {
                CacheError::InUse { path: db_path.clone() }
            }
            other => CacheError::Database(other),
        })?;
        let tree = db.open_tree("responses")?;

        info!(path = ?db_path, namespace, entries = tree.len(), "Response cache opened");

        Ok(Self {
            db,
            tree,
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Size of the whole database on disk, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.tree.flush()?;
        Ok(())
    }

    fn decode(&self, key: &[u8], value: &[u8]) -> Option<CacheEntry> {
        match serde_json::from_slice::<CacheEntry>(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    key = %String::from_utf8_lossy(key),
                    error = %e,
                    "Dropping corrupt cache entry"
                );
                if let Err(e) = self.tree.remove(key) {
                    warn!(error = %e, "Failed to remove corrupt cache entry");
                }
                None
            }
        }
    }
}

impl ResponseCache for SledResponseCache {
    fn lookup(&self, fingerprint: &CallFingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let key = fingerprint.as_str().as_bytes();
        let Some(value) = self.tree.get(key)? else {
            return Ok(None);
        };
        Ok(self.decode(key, &value).filter(|entry| !entry.is_expired()))
    }

    fn store(
        &self,
        fingerprint: &CallFingerprint,
        response: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(fingerprint.clone(), response.to_string(), ttl);
        let value = serde_json::to_vec(&entry)?;
        self.tree.insert(fingerprint.as_str().as_bytes(), value)?;
        debug!(fingerprint = fingerprint.short(), ttl_secs = entry.ttl_secs, "Cached response");
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.tree.len();
        self.tree.clear()?;
        self.tree.flush()?;
        info!(namespace = %self.namespace, removed, "Response cache cleared");
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now();
        let mut stats = CacheStats::default();
        for item in self.tree.iter() {
            let (_key, value) = item?;
            stats.total += 1;
            // Unreadable entries can never be served, so they count as expired
            match serde_json::from_slice::<CacheEntry>(&value) {
                Ok(entry) if !entry.is_expired_at(now) => stats.valid += 1,
                _ => stats.expired += 1,
            }
        }
        Ok(stats)
    }

    fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut keys_to_delete = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            let expired = serde_json::from_slice::<CacheEntry>(&value)
                .map_or(true, |entry| entry.is_expired_at(now));
            if expired {
                keys_to_delete.push(key);
            }
        }

        for key in &keys_to_delete {
            self.tree.remove(key)?;
        }
        if !keys_to_delete.is_empty() {
            self.tree.flush()?;
            info!(namespace = %self.namespace, removed = keys_to_delete.len(), "Purged expired cache entries");
        }
        Ok(keys_to_delete.len())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// Process-local cache with the same contract and no disk I/O.
#[derive(Default)]
pub struct InMemoryResponseCache {
    entries: RwLock<HashMap<CallFingerprint, CacheEntry>>,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prepared entry as-is (used to seed specific timestamps).
    pub fn insert_entry(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?
            .insert(entry.fingerprint.clone(), entry);
        Ok(())
    }
}

impl ResponseCache for InMemoryResponseCache {
    fn lookup(&self, fingerprint: &CallFingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        Ok(entries
            .get(fingerprint)
            .filter(|entry| !entry.is_expired())
            .cloned())
    }

    fn store(
        &self,
        fingerprint: &CallFingerprint,
        response: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert_entry(CacheEntry::new(fingerprint.clone(), response.to_string(), ttl))
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now();
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        let expired = entries.values().filter(|e| e.is_expired_at(now)).count();
        Ok(CacheStats {
            total: entries.len(),
            valid: entries.len() - expired,
            expired,
        })
    }

    fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before - entries.len())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
