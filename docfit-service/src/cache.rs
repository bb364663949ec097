//! Time-bounded caches for size probes and previews.
//!
//! Entries are never swept; an expired entry is simply treated as a miss and
//! overwritten by the next computation for its key.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::imaging::Geometry;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
}

/// Concurrent cache keyed by request fingerprint.
#[derive(Debug)]
pub struct ResultCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached result for `key` if present and younger than the TTL.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<T> {
        let entry = self.entries.get(key)?;
        if is_fresh(entry.created_at, now, self.ttl) {
            trace!(key = key, "Cache hit");
            Some(entry.value.clone())
        } else {
            trace!(key = key, "Cache entry expired");
            None
        }
    }

    /// Insert or overwrite; the last writer wins.
    pub fn put(&self, key: String, value: T) {
        self.put_at(key, value, Instant::now());
    }

    fn put_at(&self, key: String, value: T, created_at: Instant) {
        self.entries.insert(key, CacheEntry { value, created_at });
    }
}

/// An entry is alive until its age exceeds `ttl`.
pub fn is_fresh(created_at: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(created_at) <= ttl
}

/// SHA-256 of the source bytes as lowercase hex.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of everything that changes a probe's output bytes.
pub fn probe_key(content_hash: &str, file_id: &str, geometry: &Geometry, target_kb: u32) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        content_hash,
        file_id,
        geometry.rotate,
        target_kb,
        crop_fragment(geometry)
    )
}

/// Fingerprint of everything that changes a preview's output bytes.
pub fn preview_key(content_hash: &str, file_id: &str, geometry: &Geometry, zoom: f64) -> String {
    format!(
        "{}|{}|{}|z{}|{}",
        content_hash,
        file_id,
        geometry.rotate,
        zoom,
        crop_fragment(geometry)
    )
}

fn crop_fragment(geometry: &Geometry) -> String {
    match geometry.crop {
        Some(rect) => format!("{},{},{},{}", rect.x, rect.y, rect.width, rect.height),
        None => "nocrop".to_string(),
    }
}
