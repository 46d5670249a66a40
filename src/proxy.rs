//! Enclosure proxy cache.
//!
//! Every enclosure the filter publishes is registered here, keyed by its own
//! URL. `/proxy?url=...` only fetches URLs found in this table, so the service
//! cannot be used as an open relay, and it authenticates the download with the
//! cookie of the site the entry was registered for.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How long a published enclosure stays downloadable through the proxy.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Enclosure not found or expired: {0}")]
    NotFound(String),
}

/// A download the proxy is allowed to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub target: String,
    /// Site whose cookie authenticates the download.
    pub domain: String,
    pub created: Instant,
}

pub struct ProxyCache {
    entries: Mutex<HashMap<String, ProxyEntry>>,
    retention: Duration,
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::with_retention(RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Stores `url` for `domain`, or restarts its retention window if present.
    pub fn register(&self, url: &str, domain: &str) {
        self.entries.lock().insert(
            url.to_string(),
            ProxyEntry {
                target: url.to_string(),
                domain: domain.to_string(),
                created: Instant::now(),
            },
        );
    }

    /// Looks up a registered enclosure. Expired entries are removed on the way.
    pub fn resolve(&self, url: &str) -> Result<ProxyEntry, ProxyError> {
        let mut entries = self.entries.lock();
        match entries.get(url) {
            Some(entry) if entry.created.elapsed() < self.retention => Ok(entry.clone()),
            Some(_) => {
                entries.remove(url);
                Err(ProxyError::NotFound(url.to_string()))
            }
            None => Err(ProxyError::NotFound(url.to_string())),
        }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let retention = self.retention;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.created.elapsed() < retention);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
