// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dedup Cache (component F): a sliding window of `(target, content hash)`
//! pairs used to suppress repeated writes. Process-local, never persisted.
//! Shared across dispatcher calls when `skip_duplicates=true`.

use std::sync::Arc;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::id::Clock;

pub type DedupKey = (String, String);

/// `sha256(content)` as a lowercase hex string.
pub fn hash_content(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Normalizes a target descriptor into the string half of the dedup key.
/// The kernel does not normalize *content*; whitespace sensitivity there
/// is the caller's responsibility.
pub fn normalize_target(target: &str) -> String {
    target.to_string()
}

pub struct DedupCache {
    entries: Mutex<IndexMap<DedupKey, u64>>,
    max_entries: usize,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl DedupCache {
    pub fn new(max_entries: usize, ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(IndexMap::new()), max_entries, ttl_ms, clock }
    }

    /// Returns true (suppress) if `(target, content)` was seen within the
    /// window; refreshes its timestamp either way.
    pub async fn should_suppress(&self, target: &str, content: &str) -> bool {
        let key = (normalize_target(target), hash_content(content));
        let now = self.clock.now_utc();
        let mut entries = self.entries.lock().await;

        if let Some(ts) = entries.get(&key).copied() {
            let fresh = now.saturating_sub(ts) < self.ttl_ms;
            entries.shift_remove(&key);
            entries.insert(key, now);
            if fresh {
                return true;
            }
            return false;
        }

        entries.insert(key, now);
        while entries.len() > self.max_entries {
            entries.shift_remove_index(0);
        }
        false
    }

    /// Drop TTL-expired entries so memory stays bounded between calls.
    pub async fn sweep_expired(&self) {
        let now = self.clock.now_utc();
        let ttl = self.ttl_ms;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, ts| now.saturating_sub(*ts) < ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::MockClock;

    #[tokio::test]
    async fn repeat_within_window_is_suppressed() {
        let clock = MockClock::new(0);
        let cache = DedupCache::new(1024, 5 * 60 * 1000, clock);
        assert!(!cache.should_suppress("s1", "echo 1").await);
        assert!(cache.should_suppress("s1", "echo 1").await);
    }

    #[tokio::test]
    async fn different_targets_never_collide() {
        let clock = MockClock::new(0);
        let cache = DedupCache::new(1024, 5 * 60 * 1000, clock);
        assert!(!cache.should_suppress("s1", "echo 1").await);
        assert!(!cache.should_suppress("s2", "echo 1").await);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let clock = MockClock::new(0);
        let cache = DedupCache::new(1024, 1_000, clock.clone());
        assert!(!cache.should_suppress("s1", "echo 1").await);
        clock.advance(1_001);
        assert!(!cache.should_suppress("s1", "echo 1").await);
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let clock = MockClock::new(0);
        let cache = DedupCache::new(2, 60_000, clock.clone());
        cache.should_suppress("s1", "a").await;
        clock.advance(1);
        cache.should_suppress("s2", "b").await;
        clock.advance(1);
        cache.should_suppress("s3", "c").await; // evicts s1/a
        assert_eq!(cache.len().await, 2);
        assert!(!cache.should_suppress("s1", "a").await); // no longer remembered
    }

    #[tokio::test]
    async fn sweep_purges_expired_entries() {
        let clock = MockClock::new(0);
        let cache = DedupCache::new(1024, 1_000, clock.clone());
        cache.should_suppress("s1", "a").await;
        clock.advance(1_001);
        cache.sweep_expired().await;
        assert_eq!(cache.len().await, 0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::id::MockClock;
    use proptest::prelude::*;

    proptest! {
        /// However many `(target, content)` pairs come through, the table
        /// never grows past `max_entries`.
        #[test]
        fn cache_size_never_exceeds_max(
            max_entries in 1usize..20,
            ops in prop::collection::vec((0usize..5, 0usize..5), 1..200),
        ) {
            let clock = MockClock::new(0);
            let cache = DedupCache::new(max_entries, 60_000, clock.clone());
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                for (t, c) in &ops {
                    cache.should_suppress(&format!("s{t}"), &format!("c{c}")).await;
                    clock.advance(1);
                    assert!(cache.len().await <= max_entries);
                }
            });
        }
    }
}
