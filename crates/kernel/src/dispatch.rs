// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message Dispatcher (component J): parallel write/read fan-out, cascade
//! specificity resolution, dedup, and bounded concurrency.
//!
//! Dispatcher operations never raise for per-target failures — they come
//! back inside the result list. Only programmer errors (malformed inputs)
//! are raised.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::AgentRegistry;
use crate::dedup::DedupCache;
use crate::driver::TerminalDriver;
use crate::error::KernelError;
use crate::event::{EventBus, Priority};
use crate::lock::LockManager;
use crate::resolver::{TargetDescriptor, TargetResolver};
use crate::session::Session;

/// One message to fan out to one or more targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteMessage {
    pub content: String,
    pub targets: Vec<TargetDescriptor>,
    pub execute_enter: bool,
    pub use_encoding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteEntry {
    pub target: String,
    pub session_id: Option<String>,
    pub suppressed: bool,
    pub cancelled: bool,
    pub error: Option<KernelError>,
}

impl WriteEntry {
    fn ok(target: String, session_id: String) -> Self {
        Self { target, session_id: Some(session_id), suppressed: false, cancelled: false, error: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub entries: Vec<WriteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadEntry {
    pub target: String,
    pub lines: Vec<String>,
    pub overflowed: bool,
    pub error: Option<KernelError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub entries: Vec<ReadEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeRequest {
    pub broadcast: Option<String>,
    pub teams: HashMap<String, String>,
    pub agents: HashMap<String, String>,
    pub skip_duplicates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeEntry {
    pub agent: String,
    pub message: Option<String>,
    pub no_session: bool,
    pub write_entry: Option<WriteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeResult {
    pub entries: Vec<CascadeEntry>,
}

struct ResolvedJob {
    result_index: usize,
    target_label: String,
    session: Session,
    content: String,
    execute_enter: bool,
    use_encoding: bool,
}

pub struct Dispatcher {
    driver: Arc<dyn TerminalDriver>,
    resolver: Arc<TargetResolver>,
    agents: Arc<AgentRegistry>,
    dedup: Arc<DedupCache>,
    locks: Arc<LockManager>,
    events: Arc<EventBus>,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        driver: Arc<dyn TerminalDriver>,
        resolver: Arc<TargetResolver>,
        agents: Arc<AgentRegistry>,
        dedup: Arc<DedupCache>,
        locks: Arc<LockManager>,
        events: Arc<EventBus>,
        max_parallel: usize,
    ) -> Self {
        Self { driver, resolver, agents, dedup, locks, events, semaphore: Arc::new(Semaphore::new(max_parallel)) }
    }

    /// `caller` is the requesting agent's name, if the transport conveys
    /// one; used for lock enforcement.
    pub async fn write(
        &self,
        messages: Vec<WriteMessage>,
        parallel: bool,
        skip_duplicates: bool,
        caller: Option<&str>,
        cancel: CancellationToken,
    ) -> WriteResult {
        let mut entries: Vec<Option<WriteEntry>> = Vec::new();
        let mut jobs: Vec<ResolvedJob> = Vec::new();

        for message in &messages {
            let resolved = self.resolver.resolve(&message.targets).await;
            for err in resolved.errors {
                entries.push(Some(WriteEntry {
                    target: err.to_string(),
                    session_id: None,
                    suppressed: false,
                    cancelled: false,
                    error: Some(err),
                }));
            }
            for session in resolved.sessions {
                let idx = entries.len();
                entries.push(None);
                jobs.push(ResolvedJob {
                    result_index: idx,
                    target_label: session.name.clone(),
                    session,
                    content: message.content.clone(),
                    execute_enter: message.execute_enter,
                    use_encoding: message.use_encoding,
                });
            }
        }

        let caller_owned = caller.map(str::to_string);

        if parallel {
            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                let semaphore = Arc::clone(&self.semaphore);
                let cancel = cancel.clone();
                let caller_owned = caller_owned.clone();
                let refs = self.clone_refs();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    let index = job.result_index;
                    let entry = refs.run_write_job_inner(job, skip_duplicates, caller_owned, cancel).await;
                    (index, entry)
                }));
            }
            for handle in handles {
                if let Ok((index, entry)) = handle.await {
                    entries[index] = Some(entry);
                }
            }
        } else {
            let refs = self.clone_refs();
            for job in jobs {
                let index = job.result_index;
                let entry =
                    refs.run_write_job_inner(job, skip_duplicates, caller_owned.clone(), cancel.clone()).await;
                entries[index] = Some(entry);
            }
        }

        WriteResult { entries: entries.into_iter().map(|e| e.expect("every slot filled")).collect() }
    }

    /// Shallow clone of the `Arc` handles a write job needs, so the
    /// `parallel=true` path doesn't have to borrow `self` across an `.await`
    /// inside a spawned (`'static`) task.
    fn clone_refs(&self) -> Arc<DispatcherRefs> {
        Arc::new(DispatcherRefs {
            driver: Arc::clone(&self.driver),
            dedup: Arc::clone(&self.dedup),
            locks: Arc::clone(&self.locks),
            events: Arc::clone(&self.events),
        })
    }

    pub async fn read(
        &self,
        targets: Vec<TargetDescriptor>,
        parallel: bool,
        filter_pattern: Option<&str>,
        max_lines: Option<usize>,
        default_max_lines: usize,
    ) -> ReadResult {
        let regex = match filter_pattern {
            Some(p) => match Regex::new(p) {
                Ok(r) => Some(r),
                Err(e) => {
                    return ReadResult {
                        entries: vec![ReadEntry {
                            target: p.to_string(),
                            lines: vec![],
                            overflowed: false,
                            error: Some(KernelError::invalid("filter_pattern", e.to_string())),
                        }],
                    }
                }
            },
            None => None,
        };

        let resolved = self.resolver.resolve(&targets).await;
        let mut entries: Vec<ReadEntry> = resolved
            .errors
            .into_iter()
            .map(|e| ReadEntry { target: e.to_string(), lines: vec![], overflowed: false, error: Some(e) })
            .collect();

        let read_one = |session: Session| {
            let driver = Arc::clone(&self.driver);
            let regex = regex.clone();
            async move {
                let cap = session.max_lines.unwrap_or(default_max_lines);
                match driver.read_screen(&session.session_id, cap).await {
                    Ok(screen) => {
                        let lines = match &regex {
                            Some(r) => screen.lines.into_iter().filter(|l| r.is_match(l)).collect(),
                            None => screen.lines,
                        };
                        ReadEntry { target: session.name, lines, overflowed: screen.overflowed, error: None }
                    }
                    Err(e) => ReadEntry { target: session.name, lines: vec![], overflowed: false, error: Some(e) },
                }
            }
        };

        if parallel {
            let futures: Vec<_> = resolved.sessions.into_iter().map(read_one).collect();
            let results = futures_util::future::join_all(futures).await;
            entries.extend(results);
        } else {
            for session in resolved.sessions {
                entries.push(read_one(session).await);
            }
        }

        ReadResult { entries }
    }

    /// Cascades a message, resolved per *agent* (not per session).
    pub async fn send_cascade(&self, request: CascadeRequest, cancel: CancellationToken) -> CascadeResult {
        let all_agents = self.agents.list_agents(None).await;

        let mut candidates: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for agent in &all_agents {
            let in_team_msg = agent.teams.iter().any(|t| request.teams.contains_key(t));
            let in_agent_msg = request.agents.contains_key(&agent.agent_name);
            let in_broadcast = request.broadcast.is_some();
            if in_team_msg || in_agent_msg || in_broadcast {
                if seen.insert(agent.agent_name.clone()) {
                    candidates.push(agent.agent_name.clone());
                }
            }
        }

        let mut by_message: HashMap<String, Vec<String>> = HashMap::new();
        let mut no_session_entries = Vec::new();
        let mut agent_message = HashMap::new();

        for name in &candidates {
            let Some(agent) = all_agents.iter().find(|a| &a.agent_name == name) else { continue };

            let message = if let Some(m) = request.agents.get(name) {
                m.clone()
            } else if let Some(m) = agent.teams.iter().find_map(|t| request.teams.get(t)) {
                m.clone()
            } else if let Some(b) = &request.broadcast {
                b.clone()
            } else {
                debug!(agent = %name, "cascade candidate has no applicable message, skipping");
                continue;
            };

            if agent.session.is_none() {
                no_session_entries.push(CascadeEntry {
                    agent: name.clone(),
                    message: Some(message),
                    no_session: true,
                    write_entry: None,
                });
                continue;
            }

            agent_message.insert(name.clone(), message.clone());
            by_message.entry(message).or_default().push(name.clone());
        }

        let mut messages = Vec::new();
        let mut agent_order = Vec::new();
        for (message, agents) in &by_message {
            for agent in agents {
                agent_order.push((agent.clone(), message.clone()));
            }
            messages.push(WriteMessage {
                content: message.clone(),
                targets: agents.iter().map(|a| TargetDescriptor::Agent(a.clone())).collect(),
                execute_enter: true,
                use_encoding: false,
            });
        }

        let write_result = self.write(messages, true, request.skip_duplicates, None, cancel).await;

        let mut entries: Vec<CascadeEntry> = agent_order
            .into_iter()
            .zip(write_result.entries)
            .map(|((agent, message), write_entry)| CascadeEntry {
                agent,
                message: Some(message),
                no_session: false,
                write_entry: Some(write_entry),
            })
            .collect();
        entries.extend(no_session_entries);

        CascadeResult { entries }
    }
}

/// The subset of dispatcher state needed inside a spawned write-job task,
/// cloned cheaply (all fields are `Arc`s) so `write`'s `parallel=true` path
/// doesn't need to borrow `self` across an `.await` in a spawned task.
struct DispatcherRefs {
    driver: Arc<dyn TerminalDriver>,
    dedup: Arc<DedupCache>,
    locks: Arc<LockManager>,
    events: Arc<EventBus>,
}

impl DispatcherRefs {
    async fn run_write_job_inner(
        &self,
        job: ResolvedJob,
        skip_duplicates: bool,
        caller: Option<String>,
        cancel: CancellationToken,
    ) -> WriteEntry {
        if cancel.is_cancelled() {
            return WriteEntry {
                target: job.target_label,
                session_id: Some(job.session.session_id),
                suppressed: false,
                cancelled: true,
                error: None,
            };
        }

        if skip_duplicates && self.dedup.should_suppress(&job.session.persistent_id, &job.content).await {
            return WriteEntry {
                target: job.target_label,
                session_id: Some(job.session.session_id),
                suppressed: true,
                cancelled: false,
                error: None,
            };
        }

        if let Some(caller) = &caller {
            if let Some(owner) = self.locks.owner(&job.session.persistent_id).await {
                if &owner != caller {
                    return WriteEntry {
                        target: job.target_label,
                        session_id: Some(job.session.session_id),
                        suppressed: false,
                        cancelled: false,
                        error: Some(KernelError::LockedBy { owner }),
                    };
                }
            }
        }

        if let Err(e) = self
            .driver
            .write(&job.session.session_id, job.content.as_bytes(), job.execute_enter, job.use_encoding)
            .await
        {
            return WriteEntry {
                target: job.target_label,
                session_id: Some(job.session.session_id),
                suppressed: false,
                cancelled: false,
                error: Some(e),
            };
        }

        if job.execute_enter {
            // Fixed policy mitigating a paste/enter race: longer content gets
            // a longer settle delay before the newline, capped at 500ms.
            let delay_ms = (50.0 + 0.02 * job.content.len() as f64).min(500.0) as u64;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = self.driver.write(&job.session.session_id, b"\r", false, false).await;
        }

        if cancel.is_cancelled() {
            return WriteEntry {
                target: job.target_label,
                session_id: Some(job.session.session_id),
                suppressed: false,
                cancelled: true,
                error: None,
            };
        }

        self.events
            .publish(
                "session.input",
                serde_json::json!({"session_id": job.session.session_id, "bytes": job.content.len()}),
                Priority::Normal,
            )
            .await;

        WriteEntry::ok(job.target_label, job.session.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AutoCreateTeams;
    use crate::id::SystemClock;
    use crate::session::SessionRegistry;
    use crate::testing::RecordingDriver;
    use indexmap::IndexSet;

    async fn build() -> (
        Dispatcher,
        Arc<SessionRegistry>,
        Arc<AgentRegistry>,
        Arc<RecordingDriver>,
    ) {
        let clock = Arc::new(SystemClock::new());
        let agents = Arc::new(AgentRegistry::new(AutoCreateTeams::Yes, clock.clone()));
        let sessions = Arc::new(SessionRegistry::new(clock.clone(), Arc::clone(&agents)));
        let resolver = Arc::new(TargetResolver::new(Arc::clone(&sessions), Arc::clone(&agents)));
        let dedup = Arc::new(DedupCache::new(1024, 300_000, clock.clone()));
        let locks = Arc::new(LockManager::new(clock.clone()));
        let events = Arc::new(EventBus::new(256, clock.clone()));
        let driver = Arc::new(RecordingDriver::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&driver) as Arc<dyn TerminalDriver>,
            resolver,
            Arc::clone(&agents),
            dedup,
            locks,
            events,
            32,
        );
        (dispatcher, sessions, agents, driver)
    }

    #[tokio::test]
    async fn write_dedup_suppresses_second_identical_call() {
        let (dispatcher, sessions, _agents, driver) = build().await;
        sessions.register("live-1", "s1", None).await.unwrap();

        let msg = || WriteMessage {
            content: "echo 1".into(),
            targets: vec![TargetDescriptor::Name("s1".into())],
            execute_enter: false,
            use_encoding: false,
        };

        let first = dispatcher.write(vec![msg()], true, true, None, CancellationToken::new()).await;
        assert!(!first.entries[0].suppressed);
        let second = dispatcher.write(vec![msg()], true, true, None, CancellationToken::new()).await;
        assert!(second.entries[0].suppressed);

        assert_eq!(driver.write_count(), 1);
    }

    #[tokio::test]
    async fn write_respects_lock_from_other_agent() {
        let (dispatcher, sessions, _agents, _driver) = build().await;
        let s1 = sessions.register("live-1", "s1", None).await.unwrap();
        let clock = Arc::new(SystemClock::new());
        let locks = LockManager::new(clock);
        locks.acquire(&s1.persistent_id, "alice", None, None).await.unwrap();

        // Build a dispatcher sharing this particular lock manager.
        let agents = Arc::new(AgentRegistry::new(AutoCreateTeams::Yes, Arc::new(SystemClock::new())));
        let resolver = Arc::new(TargetResolver::new(Arc::clone(&sessions), Arc::clone(&agents)));
        let dedup = Arc::new(DedupCache::new(1024, 300_000, Arc::new(SystemClock::new())));
        let events = Arc::new(EventBus::new(256, Arc::new(SystemClock::new())));
        let driver = Arc::new(RecordingDriver::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&driver) as Arc<dyn TerminalDriver>,
            resolver,
            agents,
            dedup,
            Arc::new(locks),
            events,
            32,
        );

        let msg = WriteMessage {
            content: "rm -rf /".into(),
            targets: vec![TargetDescriptor::Name("s1".into())],
            execute_enter: false,
            use_encoding: false,
        };
        let result = dispatcher.write(vec![msg], true, true, Some("bob"), CancellationToken::new()).await;
        assert_eq!(result.entries[0].error, Some(KernelError::LockedBy { owner: "alice".into() }));
        let _ = dispatcher; // silence unused warnings if any
    }

    #[tokio::test]
    async fn cascade_specificity_s1_scenario() {
        let (dispatcher, sessions, agents, driver) = build().await;
        sessions.register("live-alice", "alice-session", None).await.unwrap();
        sessions.register("live-bob", "bob-session", None).await.unwrap();
        sessions.register("live-charlie", "charlie-session", None).await.unwrap();

        let fe: IndexSet<String> = ["frontend".to_string()].into_iter().collect();
        let be: IndexSet<String> = ["backend".to_string()].into_iter().collect();
        agents.register_agent("alice", Some("live-alice".into()), fe.clone(), None, Default::default()).await.unwrap();
        agents.register_agent("bob", Some("live-bob".into()), fe, None, Default::default()).await.unwrap();
        agents.register_agent("charlie", Some("live-charlie".into()), be, None, Default::default()).await.unwrap();

        let request = CascadeRequest {
            broadcast: Some("standup".into()),
            teams: [("frontend".to_string(), "lint".to_string())].into_iter().collect(),
            agents: [("alice".to_string(), "review #42".to_string())].into_iter().collect(),
            skip_duplicates: true,
        };

        let result = dispatcher.send_cascade(request, CancellationToken::new()).await;
        let by_agent: HashMap<String, String> =
            result.entries.into_iter().map(|e| (e.agent, e.message.unwrap_or_default())).collect();

        assert_eq!(by_agent["alice"], "review #42");
        assert_eq!(by_agent["bob"], "lint");
        assert_eq!(by_agent["charlie"], "standup");
        assert_eq!(driver.write_count(), 3);
    }

    #[tokio::test]
    async fn cascade_agent_without_session_reports_no_session() {
        let (dispatcher, _sessions, agents, _driver) = build().await;
        agents.register_agent("dave", None, IndexSet::new(), None, Default::default()).await.unwrap();

        let request = CascadeRequest { broadcast: Some("hi".into()), ..Default::default() };
        let result = dispatcher.send_cascade(request, CancellationToken::new()).await;
        assert_eq!(result.entries.len(), 1);
        assert!(result.entries[0].no_session);
    }
}
