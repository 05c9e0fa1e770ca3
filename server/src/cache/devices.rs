//! Device-list read cache
//!
//! TTL cache over the paginated device listing with an explicit
//! invalidate-on-write contract: registry membership changes and presence
//! flips call `invalidate`; metric churn rides on TTL expiry. The cache
//! owns its own lock and clock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use api_models::DeviceListResponse;

struct CacheEntry {
    response: DeviceListResponse,
    cached_at: Instant,
}

/// TTL cache keyed by (page, limit)
pub struct DeviceListCache {
    entries: RwLock<HashMap<(u64, u64), CacheEntry>>,
    ttl: Duration,
}

impl DeviceListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get a cached page if it is still fresh
    pub fn get(&self, page: u64, limit: u64) -> Option<DeviceListResponse> {
        self.get_at(page, limit, Instant::now())
    }

    fn get_at(&self, page: u64, limit: u64, now: Instant) -> Option<DeviceListResponse> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&(page, limit))?;
        if now.duration_since(entry.cached_at) >= self.ttl {
            return None;
        }
        Some(entry.response.clone())
    }

    /// Cache a page
    pub fn put(&self, page: u64, limit: u64, response: DeviceListResponse) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (page, limit),
            CacheEntry {
                response,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop all cached pages; called on every registry write
    pub fn invalidate(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
