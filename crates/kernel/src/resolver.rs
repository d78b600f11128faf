// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target Resolver (component I): translates target descriptors into a
//! concrete, deduplicated set of sessions. Unknown targets yield a
//! structured error but never abort sibling targets in a batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::AgentRegistry;
use crate::error::KernelError;
use crate::session::{LookupBy, Session, SessionRegistry};

/// A target descriptor: identifies one session, or a set of sessions by
/// agent, team, tag, or broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDescriptor {
    SessionId(String),
    Name(String),
    Agent(String),
    Team(String),
    Tag(String),
    PersistentId(String),
    Broadcast,
}

impl TargetDescriptor {
    fn describe(&self) -> String {
        match self {
            Self::SessionId(s) => format!("session_id:{s}"),
            Self::Name(s) => format!("name:{s}"),
            Self::Agent(s) => format!("agent:{s}"),
            Self::Team(s) => format!("team:{s}"),
            Self::Tag(s) => format!("tag:{s}"),
            Self::PersistentId(s) => format!("persistent_id:{s}"),
            Self::Broadcast => "broadcast".to_string(),
        }
    }
}

pub struct TargetResolver {
    sessions: Arc<SessionRegistry>,
    agents: Arc<AgentRegistry>,
}

/// Resolution outcome for one descriptor: the sessions it named (possibly
/// more than one, for team/tag/broadcast), or the error it failed with.
pub struct Resolved {
    pub sessions: Vec<Session>,
    pub errors: Vec<KernelError>,
}

impl TargetResolver {
    pub fn new(sessions: Arc<SessionRegistry>, agents: Arc<AgentRegistry>) -> Self {
        Self { sessions, agents }
    }

    /// Resolve a single descriptor to zero or more sessions.
    async fn resolve_one(&self, descriptor: &TargetDescriptor) -> Result<Vec<Session>, KernelError> {
        match descriptor {
            TargetDescriptor::SessionId(id) => self
                .sessions
                .lookup(LookupBy::Id(id.clone()))
                .await
                .map(|s| vec![s])
                .ok_or_else(|| resolution_err(descriptor, "no live session with that id")),
            TargetDescriptor::Name(name) => self
                .sessions
                .lookup(LookupBy::Name(name.clone()))
                .await
                .map(|s| vec![s])
                .ok_or_else(|| resolution_err(descriptor, "no live session with that name")),
            TargetDescriptor::PersistentId(pid) => self
                .sessions
                .lookup(LookupBy::PersistentId(pid.clone()))
                .await
                .map(|s| vec![s])
                .ok_or_else(|| resolution_err(descriptor, "no session with that persistent id")),
            TargetDescriptor::Agent(name) => {
                let Some(binding) = self.agents.resolve_agent_session(name).await else {
                    return Err(resolution_err(descriptor, "agent has no bound session"));
                };
                let session = self
                    .sessions
                    .lookup(LookupBy::Id(binding.clone()))
                    .await
                    .or(self.sessions.lookup(LookupBy::PersistentId(binding)).await);
                session.map(|s| vec![s]).ok_or_else(|| resolution_err(descriptor, "bound session not found"))
            }
            TargetDescriptor::Team(team) => {
                let agents = self.agents.list_agents(Some(team)).await;
                if agents.is_empty() {
                    return Err(resolution_err(descriptor, "no agents in team"));
                }
                let mut out = Vec::new();
                for agent in agents {
                    let Some(binding) = agent.session else { continue };
                    if let Some(s) = self.sessions.lookup(LookupBy::Id(binding.clone())).await {
                        out.push(s);
                    } else if let Some(s) = self.sessions.lookup(LookupBy::PersistentId(binding)).await {
                        out.push(s);
                    }
                }
                Ok(out)
            }
            TargetDescriptor::Tag(tag) => Ok(self.sessions.lookup_by_tag(tag).await),
            TargetDescriptor::Broadcast => {
                Ok(self.sessions.list(crate::session::SessionFilter { live_only: true, ..Default::default() }).await)
            }
        }
    }

    /// Resolve a batch of descriptors, deduplicating sessions resolved more
    /// than once within the call. Per-descriptor failures are collected,
    /// never abort peers.
    pub async fn resolve(&self, descriptors: &[TargetDescriptor]) -> Resolved {
        let mut seen = std::collections::HashSet::new();
        let mut sessions = Vec::new();
        let mut errors = Vec::new();

        for descriptor in descriptors {
            match self.resolve_one(descriptor).await {
                Ok(found) => {
                    for s in found {
                        if seen.insert(s.persistent_id.clone()) {
                            sessions.push(s);
                        }
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        Resolved { sessions, errors }
    }
}

fn resolution_err(descriptor: &TargetDescriptor, reason: &str) -> KernelError {
    KernelError::ResolutionError { descriptor: descriptor.describe(), reason: reason.to_string() }
}
