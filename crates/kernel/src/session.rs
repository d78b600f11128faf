// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Registry (component C): tracks live terminal panes by durable
//! identity, current driver handle, name, tags, and per-session read cap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent::AgentRegistry;
use crate::error::KernelError;
use crate::id::{new_persistent_id, Clock};

/// A terminal pane tracked by the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Live handle from the driver. Changes across restarts/reconnects.
    pub session_id: String,
    /// UUID assigned at first registration. Stable across restarts.
    pub persistent_id: String,
    /// Human label, unique across *live* sessions.
    pub name: String,
    /// Logically unordered, but insertion order is preserved for determinism.
    pub tags: IndexSet<String>,
    pub max_lines: Option<usize>,
    pub created_at: u64,
    /// `false` once the driver reports termination; record survives so
    /// `persistent_id` lookups keep working.
    pub alive: bool,
}

/// How a caller wants to find a session.
#[derive(Debug, Clone)]
pub enum LookupBy {
    Id(String),
    Name(String),
    PersistentId(String),
    /// The session currently bound to the named agent, if any.
    Agent(String),
    /// The first live session carrying this tag, if any.
    Tag(String),
}

/// Filter for `list`. Any `None`/empty/`false` field is unconstrained.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub name_prefix: Option<String>,
    pub tag: Option<String>,
    pub live_only: bool,
    /// Only sessions bound to this agent.
    pub agent: Option<String>,
    /// Only sessions bound to *some* agent.
    pub agents_only: bool,
}

pub struct SessionRegistry {
    // Keyed by persistent_id — the stable, never-reused identity.
    sessions: RwLock<HashMap<String, Session>>,
    // live session_id -> persistent_id, for O(1) id lookups.
    by_live_id: RwLock<HashMap<String, String>>,
    agents: Arc<AgentRegistry>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>, agents: Arc<AgentRegistry>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), by_live_id: RwLock::new(HashMap::new()), agents, clock }
    }

    /// True if `session` (by live id or persistent id) is the one the named
    /// agent is currently bound to.
    async fn bound_to_agent(&self, agent: &str, session: &Session) -> bool {
        match self.agents.resolve_agent_session(agent).await {
            Some(binding) => binding == session.session_id || binding == session.persistent_id,
            None => false,
        }
    }

    /// Restore sessions read back from the persistence log at startup.
    pub async fn restore(&self, sessions: Vec<Session>) {
        let mut map = self.sessions.write().await;
        let mut by_live = self.by_live_id.write().await;
        for s in sessions {
            if s.alive {
                by_live.insert(s.session_id.clone(), s.persistent_id.clone());
            }
            map.insert(s.persistent_id.clone(), s);
        }
    }

    /// Register a new live session, or rebind an existing `persistent_id`
    /// whose live handle had gone stale.
    pub async fn register(
        &self,
        session_handle: &str,
        name: &str,
        persistent_id: Option<String>,
    ) -> Result<Session, KernelError> {
        let mut map = self.sessions.write().await;

        if let Some(pid) = &persistent_id {
            if let Some(existing) = map.get_mut(pid) {
                if existing.name != name && name_live_conflict(&map, name, pid) {
                    return Err(KernelError::NameConflict { name: name.to_string() });
                }
                let mut by_live = self.by_live_id.write().await;
                by_live.remove(&existing.session_id);
                existing.session_id = session_handle.to_string();
                existing.name = name.to_string();
                existing.alive = true;
                by_live.insert(session_handle.to_string(), pid.clone());
                return Ok(existing.clone());
            }
        }

        if name_live_conflict(&map, name, "") {
            return Err(KernelError::NameConflict { name: name.to_string() });
        }

        let pid = persistent_id.unwrap_or_else(new_persistent_id);
        let session = Session {
            session_id: session_handle.to_string(),
            persistent_id: pid.clone(),
            name: name.to_string(),
            tags: IndexSet::new(),
            max_lines: None,
            created_at: self.clock.now_utc(),
            alive: true,
        };
        map.insert(pid.clone(), session.clone());
        self.by_live_id.write().await.insert(session_handle.to_string(), pid);
        Ok(session)
    }

    pub async fn lookup(&self, by: LookupBy) -> Option<Session> {
        match by {
            LookupBy::PersistentId(pid) => self.sessions.read().await.get(&pid).cloned(),
            LookupBy::Id(id) => {
                let map = self.sessions.read().await;
                let by_live = self.by_live_id.read().await;
                let pid = by_live.get(&id)?;
                map.get(pid).cloned()
            }
            LookupBy::Name(name) => self.sessions.read().await.values().find(|s| s.alive && s.name == name).cloned(),
            LookupBy::Tag(tag) => self.sessions.read().await.values().find(|s| s.alive && s.tags.contains(&tag)).cloned(),
            LookupBy::Agent(agent) => {
                let Some(binding) = self.agents.resolve_agent_session(&agent).await else { return None };
                let map = self.sessions.read().await;
                if let Some(s) = map.get(&binding) {
                    return Some(s.clone());
                }
                let by_live = self.by_live_id.read().await;
                let pid = by_live.get(&binding)?;
                map.get(pid).cloned()
            }
        }
    }

    pub async fn lookup_by_tag(&self, tag: &str) -> Vec<Session> {
        let map = self.sessions.read().await;
        map.values().filter(|s| s.alive && s.tags.contains(tag)).cloned().collect()
    }

    pub async fn list(&self, filter: SessionFilter) -> Vec<Session> {
        let candidates: Vec<Session> = {
            let map = self.sessions.read().await;
            map.values()
                .filter(|s| !filter.live_only || s.alive)
                .filter(|s| filter.name_prefix.as_ref().map_or(true, |p| s.name.starts_with(p.as_str())))
                .filter(|s| filter.tag.as_ref().map_or(true, |t| s.tags.contains(t)))
                .cloned()
                .collect()
        };

        if filter.agent.is_none() && !filter.agents_only {
            return candidates;
        }

        let bound: HashSet<String> = {
            let agents = self.agents.list_agents(None).await;
            agents.into_iter().filter_map(|a| a.session).collect()
        };

        let mut out = Vec::with_capacity(candidates.len());
        for s in candidates {
            if let Some(agent) = &filter.agent {
                if self.bound_to_agent(agent, &s).await {
                    out.push(s);
                }
                continue;
            }
            if bound.contains(&s.session_id) || bound.contains(&s.persistent_id) {
                out.push(s);
            }
        }
        out
    }

    pub async fn set_tags(&self, persistent_id: &str, tags: IndexSet<String>) -> Result<(), KernelError> {
        let mut map = self.sessions.write().await;
        let session = map
            .get_mut(persistent_id)
            .ok_or_else(|| KernelError::not_found("session", persistent_id))?;
        session.tags = tags;
        Ok(())
    }

    pub async fn set_max_lines(&self, persistent_id: &str, n: usize) -> Result<(), KernelError> {
        let mut map = self.sessions.write().await;
        let session = map
            .get_mut(persistent_id)
            .ok_or_else(|| KernelError::not_found("session", persistent_id))?;
        session.max_lines = Some(n);
        Ok(())
    }

    /// The driver reported termination; keep the record but mark it dead so
    /// `persistent_id` lookups still succeed for later reconnection.
    pub async fn mark_dead(&self, session_id: &str) -> Result<(), KernelError> {
        let pid = {
            let by_live = self.by_live_id.read().await;
            by_live.get(session_id).cloned()
        };
        let Some(pid) = pid else {
            return Err(KernelError::not_found("session", session_id));
        };
        let mut map = self.sessions.write().await;
        if let Some(s) = map.get_mut(&pid) {
            s.alive = false;
        }
        self.by_live_id.write().await.remove(session_id);
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }
}

fn name_live_conflict(map: &HashMap<String, Session>, name: &str, exclude_pid: &str) -> bool {
    map.values().any(|s| s.alive && s.name == name && s.persistent_id != exclude_pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AutoCreateTeams;
    use crate::id::SystemClock;

    fn registry() -> SessionRegistry {
        registry_with_agents().0
    }

    fn registry_with_agents() -> (SessionRegistry, Arc<AgentRegistry>) {
        let clock = Arc::new(SystemClock::new());
        let agents = Arc::new(AgentRegistry::new(AutoCreateTeams::Yes, Arc::clone(&clock)));
        (SessionRegistry::new(clock, Arc::clone(&agents)), agents)
    }

    #[tokio::test]
    async fn register_assigns_stable_persistent_id() {
        let reg = registry();
        let s = reg.register("live-1", "s1", None).await.unwrap();
        assert!(!s.persistent_id.is_empty());
        assert_eq!(s.name, "s1");
    }

    #[tokio::test]
    async fn duplicate_live_name_conflicts() {
        let reg = registry();
        reg.register("live-1", "s1", None).await.unwrap();
        let err = reg.register("live-2", "s1", None).await.unwrap_err();
        assert_eq!(err, KernelError::NameConflict { name: "s1".into() });
    }

    #[tokio::test]
    async fn rebind_stale_handle_by_persistent_id() {
        let reg = registry();
        let s = reg.register("live-1", "s1", None).await.unwrap();
        reg.mark_dead("live-1").await.unwrap();

        let rebound = reg.register("live-2", "s1", Some(s.persistent_id.clone())).await.unwrap();
        assert_eq!(rebound.session_id, "live-2");
        assert_eq!(rebound.persistent_id, s.persistent_id);

        let found = reg.lookup(LookupBy::Id("live-2".into())).await.unwrap();
        assert_eq!(found.persistent_id, s.persistent_id);
    }

    #[tokio::test]
    async fn mark_dead_keeps_persistent_lookup() {
        let reg = registry();
        let s = reg.register("live-1", "s1", None).await.unwrap();
        reg.mark_dead("live-1").await.unwrap();

        assert!(reg.lookup(LookupBy::Id("live-1".into())).await.is_none());
        let found = reg.lookup(LookupBy::PersistentId(s.persistent_id.clone())).await.unwrap();
        assert!(!found.alive);
    }

    #[tokio::test]
    async fn list_filters_by_name_prefix_and_tag() {
        let reg = registry();
        let a = reg.register("live-1", "agent-a", None).await.unwrap();
        reg.register("live-2", "agent-b", None).await.unwrap();
        let mut tags = IndexSet::new();
        tags.insert("frontend".to_string());
        reg.set_tags(&a.persistent_id, tags).await.unwrap();

        let by_prefix = reg.list(SessionFilter { name_prefix: Some("agent-".into()), ..Default::default() }).await;
        assert_eq!(by_prefix.len(), 2);

        let by_tag = reg.list(SessionFilter { tag: Some("frontend".into()), ..Default::default() }).await;
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].name, "agent-a");
    }

    #[tokio::test]
    async fn lookup_by_tag_returns_first_match() {
        let reg = registry();
        let a = reg.register("live-1", "s1", None).await.unwrap();
        let mut tags = IndexSet::new();
        tags.insert("frontend".to_string());
        reg.set_tags(&a.persistent_id, tags).await.unwrap();

        let found = reg.lookup(LookupBy::Tag("frontend".into())).await.unwrap();
        assert_eq!(found.persistent_id, a.persistent_id);
        assert!(reg.lookup(LookupBy::Tag("backend".into())).await.is_none());
    }

    #[tokio::test]
    async fn lookup_and_filter_by_bound_agent() {
        let (reg, agents) = registry_with_agents();
        let s1 = reg.register("live-1", "s1", None).await.unwrap();
        reg.register("live-2", "s2", None).await.unwrap();
        agents.register_agent("alice", Some(s1.session_id.clone()), IndexSet::new(), None, HashMap::new()).await.unwrap();

        let found = reg.lookup(LookupBy::Agent("alice".into())).await.unwrap();
        assert_eq!(found.persistent_id, s1.persistent_id);
        assert!(reg.lookup(LookupBy::Agent("bob".into())).await.is_none());

        let by_agent = reg.list(SessionFilter { agent: Some("alice".into()), ..Default::default() }).await;
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].persistent_id, s1.persistent_id);

        let agents_only = reg.list(SessionFilter { agents_only: true, ..Default::default() }).await;
        assert_eq!(agents_only.len(), 1);
        assert_eq!(agents_only[0].persistent_id, s1.persistent_id);
    }
}
