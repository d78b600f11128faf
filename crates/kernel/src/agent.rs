// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent/Team Registry (component D): binds stable agent names to sessions
//! and groups agents into teams. All mutations are serialized by a single
//! registry-wide mutex; lookups take the read side of the same lock.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::KernelError;
use crate::id::Clock;

/// A binding of a stable name to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_name: String,
    /// The session (by `persistent_id` or live `session_id`) this agent is
    /// currently bound to. Empty if unbound.
    pub session: Option<String>,
    /// Insertion-order-preserving so cascade team tie-breaks are deterministic.
    pub teams: IndexSet<String>,
    pub role: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Set when the last persistence write for this record failed; a
    /// background task retries until it clears.
    pub dirty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Team {
    pub team_name: String,
    pub description: Option<String>,
}

/// Whether unknown teams named during `register_agent` are auto-created or
/// rejected. Kernel policy, set at registry construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCreateTeams {
    Yes,
    No,
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    teams: RwLock<HashMap<String, Team>>,
    auto_create: AutoCreateTeams,
    clock: Arc<dyn Clock>,
}

impl AgentRegistry {
    pub fn new(auto_create: AutoCreateTeams, clock: Arc<dyn Clock>) -> Self {
        Self { agents: RwLock::new(HashMap::new()), teams: RwLock::new(HashMap::new()), auto_create, clock }
    }

    pub async fn restore(&self, agents: Vec<Agent>, teams: Vec<Team>) {
        let mut a = self.agents.write().await;
        let mut t = self.teams.write().await;
        for agent in agents {
            a.insert(agent.agent_name.clone(), agent);
        }
        for team in teams {
            t.insert(team.team_name.clone(), team);
        }
    }

    /// Idempotent by name: re-registering rebinds session/teams/role/metadata.
    pub async fn register_agent(
        &self,
        name: &str,
        binding: Option<String>,
        teams: IndexSet<String>,
        role: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<Agent, KernelError> {
        {
            let mut team_map = self.teams.write().await;
            for t in &teams {
                if !team_map.contains_key(t) {
                    if self.auto_create == AutoCreateTeams::No {
                        return Err(KernelError::not_found("team", t));
                    }
                    team_map.insert(t.clone(), Team { team_name: t.clone(), description: None });
                }
            }
        }

        let mut agents = self.agents.write().await;
        let agent = Agent { agent_name: name.to_string(), session: binding, teams, role, metadata, dirty: false };
        agents.insert(name.to_string(), agent.clone());
        Ok(agent)
    }

    pub async fn remove_agent(&self, name: &str) -> Result<(), KernelError> {
        let mut agents = self.agents.write().await;
        agents.remove(name).map(|_| ()).ok_or_else(|| KernelError::not_found("agent", name))
    }

    pub async fn create_team(&self, name: &str, description: Option<String>) -> Result<Team, KernelError> {
        let mut teams = self.teams.write().await;
        if teams.contains_key(name) {
            return Err(KernelError::NameConflict { name: name.to_string() });
        }
        let team = Team { team_name: name.to_string(), description };
        teams.insert(name.to_string(), team.clone());
        Ok(team)
    }

    pub async fn remove_team(&self, name: &str, force: bool) -> Result<(), KernelError> {
        if !force {
            let agents = self.agents.read().await;
            if agents.values().any(|a| a.teams.contains(name)) {
                return Err(KernelError::invalid("team", "team is non-empty; pass force to remove"));
            }
        } else {
            let mut agents = self.agents.write().await;
            for a in agents.values_mut() {
                a.teams.shift_remove(name);
            }
        }
        let mut teams = self.teams.write().await;
        teams.remove(name).map(|_| ()).ok_or_else(|| KernelError::not_found("team", name))
    }

    pub async fn assign(&self, agent: &str, team: &str) -> Result<(), KernelError> {
        if !self.teams.read().await.contains_key(team) {
            return Err(KernelError::not_found("team", team));
        }
        let mut agents = self.agents.write().await;
        let a = agents.get_mut(agent).ok_or_else(|| KernelError::not_found("agent", agent))?;
        a.teams.insert(team.to_string());
        Ok(())
    }

    pub async fn unassign(&self, agent: &str, team: &str) -> Result<(), KernelError> {
        let mut agents = self.agents.write().await;
        let a = agents.get_mut(agent).ok_or_else(|| KernelError::not_found("agent", agent))?;
        a.teams.shift_remove(team);
        Ok(())
    }

    pub async fn list_agents(&self, team: Option<&str>) -> Vec<Agent> {
        let agents = self.agents.read().await;
        agents.values().filter(|a| team.map_or(true, |t| a.teams.contains(t))).cloned().collect()
    }

    pub async fn list_teams(&self) -> Vec<Team> {
        self.teams.read().await.values().cloned().collect()
    }

    pub async fn get_agent(&self, name: &str) -> Option<Agent> {
        self.agents.read().await.get(name).cloned()
    }

    pub async fn resolve_agent_session(&self, name: &str) -> Option<String> {
        self.agents.read().await.get(name).and_then(|a| a.session.clone())
    }

    pub async fn snapshot(&self) -> (Vec<Agent>, Vec<Team>) {
        let agents = self.agents.read().await.values().cloned().collect();
        let teams = self.teams.read().await.values().cloned().collect();
        (agents, teams)
    }

    pub fn now_utc(&self) -> u64 {
        self.clock.now_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SystemClock;

    fn registry(auto: AutoCreateTeams) -> AgentRegistry {
        AgentRegistry::new(auto, Arc::new(SystemClock::new()))
    }

    fn set(items: &[&str]) -> IndexSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn register_agent_auto_creates_team() {
        let reg = registry(AutoCreateTeams::Yes);
        reg.register_agent("alice", Some("s1".into()), set(&["frontend"]), None, HashMap::new())
            .await
            .unwrap();
        let teams = reg.list_teams().await;
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].team_name, "frontend");
    }

    #[tokio::test]
    async fn register_agent_rejects_unknown_team_without_auto_create() {
        let reg = registry(AutoCreateTeams::No);
        let err = reg
            .register_agent("alice", Some("s1".into()), set(&["frontend"]), None, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));
    }

    #[tokio::test]
    async fn re_registering_rebinds() {
        let reg = registry(AutoCreateTeams::Yes);
        reg.register_agent("alice", Some("s1".into()), set(&[]), None, HashMap::new()).await.unwrap();
        reg.register_agent("alice", Some("s2".into()), set(&[]), None, HashMap::new()).await.unwrap();
        let a = reg.get_agent("alice").await.unwrap();
        assert_eq!(a.session, Some("s2".into()));
    }

    #[tokio::test]
    async fn remove_team_requires_force_when_non_empty() {
        let reg = registry(AutoCreateTeams::Yes);
        reg.register_agent("alice", None, set(&["frontend"]), None, HashMap::new()).await.unwrap();
        assert!(reg.remove_team("frontend", false).await.is_err());
        reg.remove_team("frontend", true).await.unwrap();
        let a = reg.get_agent("alice").await.unwrap();
        assert!(!a.teams.contains("frontend"));
    }

    #[tokio::test]
    async fn team_insertion_order_preserved_for_tie_break() {
        let reg = registry(AutoCreateTeams::Yes);
        reg.register_agent("alice", None, set(&["backend", "frontend"]), None, HashMap::new()).await.unwrap();
        let a = reg.get_agent("alice").await.unwrap();
        let ordered: Vec<&String> = a.teams.iter().collect();
        assert_eq!(ordered, vec!["backend", "frontend"]);
    }
}
