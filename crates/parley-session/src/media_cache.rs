// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded cache of media references keyed by message id.
//!
//! Bridges the gap between "message observed now" and "media fetched later":
//! webhook consumers typically fetch media asynchronously via a follow-up
//! `GET /media/{messageId}`. Eviction is strict insertion order (FIFO), not
//! access order -- reads never reorder or remove entries, so retries keep
//! working until the entry ages out.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parley_core::types::MediaHandle;
use tokio::sync::Mutex;
use tracing::debug;

/// One cached media reference.
#[derive(Debug, Clone)]
pub struct MediaCacheEntry {
    /// Opaque driver descriptor used for the actual download.
    pub handle: MediaHandle,
    /// Mime type reported by the driver.
    pub media_type: String,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheInner {
    /// Insertion order; front is the oldest entry.
    order: VecDeque<String>,
    entries: HashMap<String, MediaCacheEntry>,
}

/// Bounded FIFO media reference store.
///
/// Invariant: `len() <= bound` after any `put`.
#[derive(Debug)]
pub struct MediaCache {
    bound: usize,
    inner: Mutex<CacheInner>,
}

impl MediaCache {
    pub fn new(bound: usize) -> Self {
        Self {
            bound: bound.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Configured capacity bound.
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Inserts an entry, evicting the oldest-inserted entries as needed to
    /// keep the cache within its bound. Re-inserting an existing id replaces
    /// the entry without changing its insertion position.
    pub async fn put(&self, message_id: &str, handle: MediaHandle, media_type: &str) {
        let mut inner = self.inner.lock().await;

        let entry = MediaCacheEntry {
            handle,
            media_type: media_type.to_string(),
            stored_at: Utc::now(),
        };

        if inner.entries.insert(message_id.to_string(), entry).is_none() {
            inner.order.push_back(message_id.to_string());
        }

        while inner.order.len() > self.bound {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                debug!(message_id = %oldest, "evicted oldest media cache entry");
            }
        }
    }

    /// Non-destructive lookup. Entries are only removed by eviction.
    pub async fn get(&self, message_id: &str) -> Option<MediaCacheEntry> {
        self.inner.lock().await.entries.get(message_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.order.is_empty()
    }

    /// Drops every entry. Returns how many were dropped; used by the memory
    /// guardian's cleanup action.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let dropped = inner.order.len();
        inner.order.clear();
        inner.entries.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(token: &str) -> MediaHandle {
        MediaHandle(token.to_string())
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let cache = MediaCache::new(10);
        cache.put("m1", handle("tok-1"), "image/jpeg").await;

        let entry = cache.get("m1").await.expect("entry should exist");
        assert_eq!(entry.handle.0, "tok-1");
        assert_eq!(entry.media_type, "image/jpeg");
    }

    #[tokio::test]
    async fn get_is_non_destructive() {
        let cache = MediaCache::new(10);
        cache.put("m1", handle("tok-1"), "image/jpeg").await;

        for _ in 0..3 {
            assert!(cache.get("m1").await.is_some(), "reads must not consume");
        }
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn size_never_exceeds_bound() {
        let cache = MediaCache::new(5);
        for i in 0..50 {
            cache.put(&format!("m{i}"), handle(&format!("tok-{i}")), "video/mp4").await;
            assert!(cache.len().await <= 5, "bound invariant violated");
        }
        assert_eq!(cache.len().await, 5);
    }

    #[tokio::test]
    async fn eviction_is_strict_insertion_order() {
        let cache = MediaCache::new(3);
        cache.put("a", handle("ta"), "image/jpeg").await;
        cache.put("b", handle("tb"), "image/jpeg").await;
        cache.put("c", handle("tc"), "image/jpeg").await;

        // Reading "a" must not protect it from eviction (FIFO, not LRU).
        assert!(cache.get("a").await.is_some());

        cache.put("d", handle("td"), "image/jpeg").await;
        assert!(cache.get("a").await.is_none(), "oldest inserted must go first");
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn bound_201_puts_on_200_cache() {
        let cache = MediaCache::new(200);
        for i in 1..=201 {
            cache.put(&format!("m{i}"), handle(&format!("t{i}")), "audio/ogg").await;
        }

        assert_eq!(cache.len().await, 200);
        assert!(cache.get("m1").await.is_none(), "first entry must be evicted");
        for i in 2..=201 {
            assert!(
                cache.get(&format!("m{i}")).await.is_some(),
                "entry m{i} should survive"
            );
        }
    }

    #[tokio::test]
    async fn reinsert_replaces_without_duplicating() {
        let cache = MediaCache::new(3);
        cache.put("a", handle("old"), "image/jpeg").await;
        cache.put("a", handle("new"), "image/png").await;

        assert_eq!(cache.len().await, 1);
        let entry = cache.get("a").await.unwrap();
        assert_eq!(entry.handle.0, "new");
        assert_eq!(entry.media_type, "image/png");
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = MediaCache::new(10);
        cache.put("a", handle("ta"), "image/jpeg").await;
        cache.put("b", handle("tb"), "image/jpeg").await;

        assert_eq!(cache.clear().await, 2);
        assert!(cache.is_empty().await);
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn zero_bound_is_clamped_to_one() {
        let cache = MediaCache::new(0);
        assert_eq!(cache.bound(), 1);
        cache.put("a", handle("ta"), "image/jpeg").await;
        assert_eq!(cache.len().await, 1);
    }
}
