// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock Manager (component E): per-session exclusive write locks. At most
//! one active lock per session; expired locks are treated as absent at
//! read time and also swept periodically so `list_locks` stays current
//! between reads.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::KernelError;
use crate::id::Clock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub session: String,
    pub owner_agent: String,
    pub reason: Option<String>,
    pub acquired_at: u64,
    pub expires_at: Option<u64>,
}

impl Lock {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

pub struct LockManager {
    locks: RwLock<HashMap<String, Lock>>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { locks: RwLock::new(HashMap::new()), clock }
    }

    pub async fn acquire(
        &self,
        session: &str,
        owner_agent: &str,
        reason: Option<String>,
        ttl_secs: Option<u64>,
    ) -> Result<Lock, KernelError> {
        let now = self.clock.now_utc();
        let mut locks = self.locks.write().await;
        if let Some(existing) = locks.get(session) {
            if !existing.is_expired(now) {
                return Err(KernelError::LockedBy { owner: existing.owner_agent.clone() });
            }
        }
        let lock = Lock {
            session: session.to_string(),
            owner_agent: owner_agent.to_string(),
            reason,
            acquired_at: now,
            expires_at: ttl_secs.map(|s| now + s * 1000),
        };
        locks.insert(session.to_string(), lock.clone());
        Ok(lock)
    }

    pub async fn release(&self, session: &str, owner_agent: &str) -> Result<(), KernelError> {
        let mut locks = self.locks.write().await;
        match locks.get(session) {
            Some(lock) if lock.owner_agent == owner_agent => {
                locks.remove(session);
                Ok(())
            }
            Some(_) => Err(KernelError::NotOwner),
            None => Err(KernelError::not_found("lock", session)),
        }
    }

    /// Empty if unlocked or expired.
    pub async fn owner(&self, session: &str) -> Option<String> {
        let now = self.clock.now_utc();
        let locks = self.locks.read().await;
        locks.get(session).filter(|l| !l.is_expired(now)).map(|l| l.owner_agent.clone())
    }

    /// Kernel policy: always denied. Integrators may override at the
    /// façade layer; no grant is implicit.
    pub async fn request_access(&self, session: &str, requester_agent: &str, owner_agent: &str) -> AccessRequest {
        AccessRequest {
            session: session.to_string(),
            requester_agent: requester_agent.to_string(),
            owner_agent: owner_agent.to_string(),
            granted: false,
        }
    }

    pub async fn list(&self) -> Vec<Lock> {
        let now = self.clock.now_utc();
        self.locks.read().await.values().filter(|l| !l.is_expired(now)).cloned().collect()
    }

    /// Periodic GC: drop entries past their expiry so memory doesn't grow
    /// with dead locks between reads.
    pub async fn sweep_expired(&self) {
        let now = self.clock.now_utc();
        let mut locks = self.locks.write().await;
        locks.retain(|_, l| !l.is_expired(now));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub session: String,
    pub requester_agent: String,
    pub owner_agent: String,
    pub granted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::MockClock;

    #[tokio::test]
    async fn second_acquire_by_different_agent_fails() {
        let clock = MockClock::new(0);
        let mgr = LockManager::new(clock);
        mgr.acquire("s1", "alice", None, None).await.unwrap();
        let err = mgr.acquire("s1", "bob", None, None).await.unwrap_err();
        assert_eq!(err, KernelError::LockedBy { owner: "alice".into() });
    }

    #[tokio::test]
    async fn release_by_non_owner_fails() {
        let clock = MockClock::new(0);
        let mgr = LockManager::new(clock);
        mgr.acquire("s1", "alice", None, None).await.unwrap();
        let err = mgr.release("s1", "bob").await.unwrap_err();
        assert_eq!(err, KernelError::NotOwner);
    }

    #[tokio::test]
    async fn release_then_reacquire_by_peer_succeeds() {
        let clock = MockClock::new(0);
        let mgr = LockManager::new(clock);
        mgr.acquire("s1", "alice", None, None).await.unwrap();
        mgr.release("s1", "alice").await.unwrap();
        mgr.acquire("s1", "bob", None, None).await.unwrap();
        assert_eq!(mgr.owner("s1").await, Some("bob".into()));
    }

    #[tokio::test]
    async fn expired_lock_counts_as_absent() {
        let clock = MockClock::new(0);
        let mgr = LockManager::new(clock.clone());
        mgr.acquire("s1", "alice", None, Some(10)).await.unwrap();
        assert_eq!(mgr.owner("s1").await, Some("alice".into()));
        clock.advance(10_001);
        assert_eq!(mgr.owner("s1").await, None);
        // A peer can now acquire since the old lock is treated as released.
        mgr.acquire("s1", "bob", None, None).await.unwrap();
        assert_eq!(mgr.owner("s1").await, Some("bob".into()));
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let clock = MockClock::new(0);
        let mgr = LockManager::new(clock.clone());
        mgr.acquire("s1", "alice", None, Some(1)).await.unwrap();
        clock.advance(2_000);
        mgr.sweep_expired().await;
        assert!(mgr.list().await.is_empty());
    }

    #[tokio::test]
    async fn request_access_is_always_denied_by_default() {
        let clock = MockClock::new(0);
        let mgr = LockManager::new(clock);
        mgr.acquire("s1", "alice", None, None).await.unwrap();
        let req = mgr.request_access("s1", "bob", "alice").await;
        assert!(!req.granted);
    }
}
