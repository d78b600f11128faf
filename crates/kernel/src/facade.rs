// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestration Façade (component M): the single entry point that owns
//! every other component and enforces cross-component call ordering —
//! resolver, then lock check, then dispatcher/executor, then persistence,
//! then event publish.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent::{Agent, AgentRegistry, AutoCreateTeams, Team};
use crate::config::KernelConfig;
use crate::dedup::DedupCache;
use crate::dispatch::{CascadeRequest, CascadeResult, Dispatcher, ReadResult, WriteMessage, WriteResult};
use crate::driver::{BoxFuture, Color, ColorUpdate, TerminalDriver};
use crate::error::KernelError;
use crate::event::{output_pattern_handler, EventBus, Priority, SubscriptionId};
use crate::id::{new_feedback_id, Clock, SystemClock};
use crate::lock::{AccessRequest, Lock, LockManager};
use crate::monitor::OutputMonitor;
use crate::notify::{format_agent_line, Level, Notification, NotificationBuffer};
use crate::persist::{Envelope, LogFile, PersistenceLog};
use crate::plan::{Manager, ManagerRegistry, Plan, PlanExecutor, PlanResult, PlanStep, Strategy, StepRunner};
use crate::resolver::{TargetDescriptor, TargetResolver};
use crate::session::{Session, SessionFilter, SessionRegistry};

/// Runs a plan step by handing its task to the worker's bound session via
/// the Message Dispatcher, then polling that session's output until the
/// step's validation regex matches or its timeout elapses.
struct DispatcherStepRunner {
    dispatcher: Arc<Dispatcher>,
    default_max_lines: usize,
}

impl StepRunner for DispatcherStepRunner {
    fn run<'a>(&'a self, worker: &'a str, step: &'a PlanStep) -> BoxFuture<'a, Result<String, KernelError>> {
        Box::pin(async move {
            let targets = vec![TargetDescriptor::Agent(worker.to_string())];
            let message = WriteMessage {
                content: step.task.clone(),
                targets: targets.clone(),
                execute_enter: true,
                use_encoding: false,
            };
            let write_result = self.dispatcher.write(vec![message], false, false, None, CancellationToken::new()).await;
            if let Some(entry) = write_result.entries.first() {
                if let Some(err) = &entry.error {
                    return Err(err.clone());
                }
            }

            let validation = step.validation.as_deref().map(Regex::new).transpose().ok().flatten();
            let deadline = tokio::time::Instant::now() + Duration::from_millis(step.timeout_ms.max(1));
            let mut last = String::new();
            loop {
                let read_result = self
                    .dispatcher
                    .read(targets.clone(), false, None, None, self.default_max_lines)
                    .await;
                if let Some(entry) = read_result.entries.first() {
                    last = entry.lines.join("\n");
                    if validation.as_ref().map_or(true, |re| re.is_match(&last)) {
                        return Ok(last);
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(last);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    }
}

const GC_INTERVAL: Duration = Duration::from_secs(30);
/// Log compaction is heavier (a full file rewrite per log) and the logs grow
/// far slower than locks/dedup entries expire, so it runs on its own, wider
/// cadence rather than sharing [`GC_INTERVAL`].
const COMPACTION_INTERVAL: Duration = Duration::from_secs(300);

/// Common shape of a periodically-swept component, so the Lock Manager,
/// Dedup Cache, and persistence compaction can share one background-loop
/// spawner.
trait Sweepable: Send + Sync {
    fn sweep<'a>(&'a self) -> BoxFuture<'a, ()>;
}

impl Sweepable for LockManager {
    fn sweep<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(self.sweep_expired())
    }
}

impl Sweepable for DedupCache {
    fn sweep<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(self.sweep_expired())
    }
}

fn envelope<T>(kind: &str, data: T, now: u64) -> Envelope<T> {
    Envelope { kind: kind.to_string(), version: 1, data, created_at: now, updated_at: now }
}

/// Rewrites each append-only log to the registries' current in-memory state,
/// dropping superseded records. `feedback` is a pure audit trail with no
/// canonical "current state" to compact against, so it's left append-only.
struct CompactionSweeper {
    agents: Arc<AgentRegistry>,
    managers: Arc<ManagerRegistry>,
    notifications: Arc<NotificationBuffer>,
    persistence: Arc<PersistenceLog>,
    clock: Arc<dyn Clock>,
}

impl Sweepable for CompactionSweeper {
    fn sweep<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let now = self.clock.now_utc();

            let (agents, teams) = self.agents.snapshot().await;
            let agent_records: Vec<_> = agents.into_iter().map(|a| envelope("agent", a, now)).collect();
            if let Err(e) = self.persistence.compact(LogFile::Agents, &agent_records) {
                warn!(error = %e, "agent log compaction failed");
            }
            let team_records: Vec<_> = teams.into_iter().map(|t| envelope("team", t, now)).collect();
            if let Err(e) = self.persistence.compact(LogFile::Teams, &team_records) {
                warn!(error = %e, "team log compaction failed");
            }

            let manager_records: Vec<_> = self.managers.list().await.into_iter().map(|m| envelope("manager", m, now)).collect();
            if let Err(e) = self.persistence.compact(LogFile::Managers, &manager_records) {
                warn!(error = %e, "manager log compaction failed");
            }

            let notification_records: Vec<_> = self
                .notifications
                .get(None, None, usize::MAX)
                .await
                .into_iter()
                .map(|n| envelope("notification", n, now))
                .collect();
            if let Err(e) = self.persistence.compact(LogFile::Notifications, &notification_records) {
                warn!(error = %e, "notification log compaction failed");
            }

            tracing::debug!("persistence compaction complete");
        })
    }
}

/// Spawns a background task that calls `target.sweep()` every `interval`
/// until `shutdown` is cancelled.
fn spawn_gc_loop(name: &'static str, target: Arc<dyn Sweepable>, interval: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            target.sweep().await;
            tracing::debug!(component = name, "gc sweep complete");
        }
    });
}

#[derive(Debug, Clone)]
struct Role {
    allowed_tools: HashSet<String>,
}

fn builtin_roles() -> HashMap<String, Role> {
    let mut roles = HashMap::new();
    roles.insert("admin".to_string(), Role { allowed_tools: ["*".to_string()].into_iter().collect() });
    roles.insert(
        "operator".to_string(),
        Role {
            allowed_tools: ["write_to_sessions", "read_sessions", "send_cascade_message"]
                .into_iter()
                .map(String::from)
                .collect(),
        },
    );
    roles.insert(
        "readonly".to_string(),
        Role { allowed_tools: ["read_sessions", "list_sessions"].into_iter().map(String::from).collect() },
    );
    roles
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub agent: Option<String>,
    pub agent_type: Option<String>,
    pub team: Option<String>,
    pub profile: Option<String>,
    pub command: Option<String>,
    pub monitor: Option<bool>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreationResult {
    pub name: String,
    pub session: Option<Session>,
    pub error: Option<KernelError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionModification {
    pub target: TargetDescriptor,
    pub background_color: Option<Color>,
    pub tab_color: Option<Color>,
    pub cursor_color: Option<Color>,
    pub badge: Option<String>,
    pub focus: Option<bool>,
    pub set_active: Option<bool>,
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitForAgentResult {
    pub notification: Option<Notification>,
    pub timed_out: bool,
    pub output: Option<String>,
    pub timeout_summary: Option<String>,
}

/// Maps `agent_type` to the CLI launcher string sent to a freshly created
/// session. Unrecognized values are `InvalidArgument{field: "agent_type"}`.
fn agent_launcher_command(agent_type: &str) -> Result<&'static str, KernelError> {
    match agent_type {
        "claude" => Ok("claude"),
        "gemini" => Ok("gemini"),
        "codex" => Ok("codex"),
        "copilot" => Ok("gh copilot"),
        other => Err(KernelError::invalid("agent_type", format!("unrecognized agent_type: {other}"))),
    }
}

pub struct Facade {
    pub sessions: Arc<SessionRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub locks: Arc<LockManager>,
    pub dedup: Arc<DedupCache>,
    pub notifications: Arc<NotificationBuffer>,
    pub events: Arc<EventBus>,
    pub resolver: Arc<TargetResolver>,
    pub dispatcher: Arc<Dispatcher>,
    pub managers: Arc<ManagerRegistry>,
    pub executor: Arc<PlanExecutor>,
    pub monitor: Arc<OutputMonitor>,
    persistence: Arc<PersistenceLog>,
    driver: Arc<dyn TerminalDriver>,
    clock: Arc<dyn Clock>,
    config: KernelConfig,
    roles: RwLock<HashMap<String, Role>>,
    session_roles: RwLock<HashMap<String, String>>,
    active_session: Mutex<Option<String>>,
    shutdown_token: CancellationToken,
}

impl Facade {
    /// Construction order: clock → persistence → registries → lock → event
    /// bus → dispatcher → plan executor → output monitor. Startup restores
    /// every registry from its persisted log.
    pub async fn new(driver: Arc<dyn TerminalDriver>, config: KernelConfig) -> Result<Self, KernelError> {
        config.validate().map_err(|e| KernelError::InvalidArgument { field: "config".into(), reason: e.to_string() })?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let persistence = Arc::new(PersistenceLog::new(config.resolved_log_dir())?);

        let agents = Arc::new(AgentRegistry::new(AutoCreateTeams::Yes, Arc::clone(&clock)));
        let agent_records: Vec<Envelope<Agent>> = persistence.read_all(LogFile::Agents);
        let team_records: Vec<Envelope<Team>> = persistence.read_all(LogFile::Teams);
        agents
            .restore(
                agent_records.into_iter().map(|e| e.data).collect(),
                team_records.into_iter().map(|e| e.data).collect(),
            )
            .await;

        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&clock), Arc::clone(&agents)));
        sessions.restore(persistence.read_sessions_snapshot()).await;

        let locks = Arc::new(LockManager::new(Arc::clone(&clock)));
        let dedup = Arc::new(DedupCache::new(config.dedup_max, config.dedup_ttl_s * 1000, Arc::clone(&clock)));
        let notifications =
            Arc::new(NotificationBuffer::new(config.notify_max_total, config.notify_max_per_agent, Arc::clone(&clock)));
        let events = Arc::new(EventBus::new(config.event_history, Arc::clone(&clock)));

        let resolver = Arc::new(TargetResolver::new(Arc::clone(&sessions), Arc::clone(&agents)));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&driver),
            Arc::clone(&resolver),
            Arc::clone(&agents),
            Arc::clone(&dedup),
            Arc::clone(&locks),
            Arc::clone(&events),
            config.dispatch_concurrency,
        ));

        let managers = Arc::new(ManagerRegistry::new());
        let manager_records: Vec<Envelope<Manager>> = persistence.read_all(LogFile::Managers);
        managers.restore(manager_records.into_iter().map(|e| e.data).collect()).await;

        let runner: Arc<dyn StepRunner> = Arc::new(DispatcherStepRunner {
            dispatcher: Arc::clone(&dispatcher),
            default_max_lines: config.default_max_lines,
        });
        let executor = Arc::new(PlanExecutor::new(Arc::clone(&managers), Arc::clone(&events), runner, config.dispatch_concurrency));

        let monitor = Arc::new(OutputMonitor::new(Arc::clone(&driver), Arc::clone(&events), config.poll_interval_ms));

        let shutdown_token = CancellationToken::new();
        spawn_gc_loop("lock", Arc::clone(&locks) as Arc<dyn Sweepable>, GC_INTERVAL, shutdown_token.clone());
        spawn_gc_loop("dedup", Arc::clone(&dedup) as Arc<dyn Sweepable>, GC_INTERVAL, shutdown_token.clone());
        let compactor = Arc::new(CompactionSweeper {
            agents: Arc::clone(&agents),
            managers: Arc::clone(&managers),
            notifications: Arc::clone(&notifications),
            persistence: Arc::clone(&persistence),
            clock: Arc::clone(&clock),
        });
        spawn_gc_loop("compaction", compactor as Arc<dyn Sweepable>, COMPACTION_INTERVAL, shutdown_token.clone());

        Ok(Self {
            sessions,
            agents,
            locks,
            dedup,
            notifications,
            events,
            resolver,
            dispatcher,
            managers,
            executor,
            monitor,
            persistence,
            driver,
            clock,
            config,
            roles: RwLock::new(builtin_roles()),
            session_roles: RwLock::new(HashMap::new()),
            active_session: Mutex::new(None),
            shutdown_token,
        })
    }

    /// Reverse construction order: stop polling before anything else, then
    /// signal every long-running operation's cancellation token.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.monitor.stop_all().await;
    }

    // ---- Sessions -----------------------------------------------------

    pub async fn list_sessions(&self, filter: SessionFilter) -> Vec<Session> {
        self.sessions.list(filter).await
    }

    pub async fn create_sessions(&self, configs: Vec<SessionConfig>, _layout: Option<String>) -> Vec<SessionCreationResult> {
        let mut results = Vec::with_capacity(configs.len());
        for cfg in configs {
            match self.create_one_session(&cfg).await {
                Ok(session) => results.push(SessionCreationResult { name: cfg.name, session: Some(session), error: None }),
                Err(e) => results.push(SessionCreationResult { name: cfg.name, session: None, error: Some(e) }),
            }
        }
        results
    }

    async fn create_one_session(&self, cfg: &SessionConfig) -> Result<Session, KernelError> {
        let launcher = cfg.agent_type.as_deref().map(agent_launcher_command).transpose()?;

        let handle = self.driver.create(&cfg.name, cfg.profile.as_deref()).await?;
        let session = self.sessions.register(&handle, &cfg.name, None).await?;

        if let Some(agent) = &cfg.agent {
            let teams: IndexSet<String> = cfg.team.iter().cloned().collect();
            let registered = self.agents.register_agent(agent, Some(session.session_id.clone()), teams, cfg.role.clone(), HashMap::new()).await?;
            self.persist_agent(&registered).await;
        }

        if let Some(launcher) = launcher {
            let _ = self.driver.write(&handle, launcher.as_bytes(), true, false).await;
        }
        if let Some(command) = &cfg.command {
            let _ = self.driver.write(&handle, command.as_bytes(), true, false).await;
        }
        if cfg.monitor.unwrap_or(false) {
            self.monitor.start(&handle, self.config.default_max_lines).await;
        }

        self.persist_sessions_snapshot().await;
        Ok(session)
    }

    pub async fn split_session(
        &self,
        target: TargetDescriptor,
        direction: &str,
        name: &str,
        agent: Option<String>,
        team: Option<String>,
        command: Option<String>,
        monitor: bool,
    ) -> Result<Session, KernelError> {
        let geometry = crate::driver::direction_to_geometry(direction)?;
        let resolved = self.resolver.resolve(&[target]).await;
        let base = resolved.sessions.into_iter().next().ok_or_else(|| {
            resolved.errors.into_iter().next().unwrap_or_else(|| KernelError::not_found("session", "target"))
        })?;

        let handle = self.driver.split(&base.session_id, geometry, None).await?;
        let session = self.sessions.register(&handle, name, None).await?;

        if let Some(agent) = agent {
            let teams: IndexSet<String> = team.into_iter().collect();
            let registered = self.agents.register_agent(&agent, Some(session.session_id.clone()), teams, None, HashMap::new()).await?;
            self.persist_agent(&registered).await;
        }
        if let Some(command) = command {
            let _ = self.driver.write(&handle, command.as_bytes(), true, false).await;
        }
        if monitor {
            self.monitor.start(&handle, self.config.default_max_lines).await;
        }

        self.persist_sessions_snapshot().await;
        Ok(session)
    }

    pub async fn modify_sessions(&self, modifications: Vec<SessionModification>) -> Vec<Result<(), KernelError>> {
        let mut results = Vec::with_capacity(modifications.len());
        for modification in modifications {
            results.push(self.apply_modification(modification).await);
        }
        results
    }

    async fn apply_modification(&self, modification: SessionModification) -> Result<(), KernelError> {
        let resolved = self.resolver.resolve(&[modification.target]).await;
        if let Some(err) = resolved.errors.into_iter().next() {
            return Err(err);
        }
        for session in resolved.sessions {
            if modification.background_color.is_some() || modification.tab_color.is_some() || modification.cursor_color.is_some() {
                let update = ColorUpdate {
                    background: modification.background_color,
                    tab: modification.tab_color,
                    cursor: modification.cursor_color,
                };
                self.driver.set_colors(&session.session_id, update).await?;
            }
            if let Some(badge) = &modification.badge {
                self.driver.set_badge(&session.session_id, badge).await?;
            }
            if modification.focus == Some(true) {
                self.driver.focus(&session.session_id).await?;
            }
            if modification.set_active == Some(true) {
                *self.active_session.lock().await = Some(session.persistent_id.clone());
            }
            if let Some(n) = modification.max_lines {
                self.sessions.set_max_lines(&session.persistent_id, n).await?;
            }
        }
        Ok(())
    }

    pub async fn set_session_tags(&self, persistent_id: &str, tags: IndexSet<String>) -> Result<(), KernelError> {
        self.sessions.set_tags(persistent_id, tags).await
    }

    pub async fn query_sessions_by_tag(&self, tag: &str) -> Vec<Session> {
        self.sessions.lookup_by_tag(tag).await
    }

    pub async fn set_active_session(&self, target: TargetDescriptor) -> Result<(), KernelError> {
        let resolved = self.resolver.resolve(&[target]).await;
        let session = resolved.sessions.into_iter().next().ok_or_else(|| {
            resolved.errors.into_iter().next().unwrap_or_else(|| KernelError::not_found("session", "target"))
        })?;
        *self.active_session.lock().await = Some(session.persistent_id);
        Ok(())
    }

    pub async fn focus_session(&self, target: TargetDescriptor) -> Result<(), KernelError> {
        let resolved = self.resolver.resolve(&[target]).await;
        let session = resolved.sessions.into_iter().next().ok_or_else(|| {
            resolved.errors.into_iter().next().unwrap_or_else(|| KernelError::not_found("session", "target"))
        })?;
        self.driver.focus(&session.session_id).await
    }

    // ---- Message dispatch ---------------------------------------------

    pub async fn write_to_sessions(
        &self,
        messages: Vec<WriteMessage>,
        parallel: bool,
        skip_duplicates: bool,
        send_conditions: Option<HashMap<String, TargetDescriptor>>,
        caller: Option<&str>,
    ) -> Result<WriteResult, KernelError> {
        let messages = match send_conditions {
            Some(conditions) => self.apply_send_conditions(messages, &conditions).await?,
            None => messages,
        };
        Ok(self.dispatcher.write(messages, parallel, skip_duplicates, caller, self.shutdown_token.clone()).await)
    }

    /// Filters out targets whose gating regex does not match their most
    /// recent output before the write reaches the dispatcher.
    async fn apply_send_conditions(
        &self,
        messages: Vec<WriteMessage>,
        conditions: &HashMap<String, TargetDescriptor>,
    ) -> Result<Vec<WriteMessage>, KernelError> {
        let mut gated: Vec<(serde_json::Value, bool)> = Vec::new();
        for (pattern, target) in conditions {
            let regex = Regex::new(pattern).map_err(|e| KernelError::invalid("send_conditions", e.to_string()))?;
            let read = self
                .dispatcher
                .read(vec![target.clone()], false, None, None, self.config.default_max_lines)
                .await;
            let recent = read.entries.first().map(|e| e.lines.join("\n")).unwrap_or_default();
            let key = serde_json::to_value(target).unwrap_or(serde_json::Value::Null);
            gated.push((key, regex.is_match(&recent)));
        }

        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let targets: Vec<TargetDescriptor> = message
                .targets
                .into_iter()
                .filter(|t| {
                    let key = serde_json::to_value(t).unwrap_or(serde_json::Value::Null);
                    gated.iter().all(|(gk, ok)| gk != &key || *ok)
                })
                .collect();
            if !targets.is_empty() {
                out.push(WriteMessage { targets, ..message });
            }
        }
        Ok(out)
    }

    pub async fn read_sessions(
        &self,
        targets: Vec<TargetDescriptor>,
        parallel: bool,
        filter_pattern: Option<&str>,
        max_lines: Option<usize>,
    ) -> ReadResult {
        self.dispatcher.read(targets, parallel, filter_pattern, max_lines, self.config.default_max_lines).await
    }

    pub async fn send_cascade_message(&self, request: CascadeRequest) -> CascadeResult {
        self.dispatcher.send_cascade(request, self.shutdown_token.clone()).await
    }

    pub async fn send_control_character(&self, target: TargetDescriptor, letter: char) -> Vec<Result<(), KernelError>> {
        let byte = match crate::driver::control_char_code(letter) {
            Ok(b) => b,
            Err(e) => return vec![Err(e)],
        };
        let resolved = self.resolver.resolve(&[target]).await;
        let mut results: Vec<Result<(), KernelError>> = resolved.errors.into_iter().map(Err).collect();
        for session in resolved.sessions {
            results.push(self.driver.send_control(&session.session_id, byte).await);
        }
        results
    }

    pub async fn send_special_key(&self, target: TargetDescriptor, key: &str) -> Vec<Result<(), KernelError>> {
        let bytes = match crate::driver::special_key_bytes(key) {
            Ok(b) => b,
            Err(e) => return vec![Err(e)],
        };
        let resolved = self.resolver.resolve(&[target]).await;
        let mut results: Vec<Result<(), KernelError>> = resolved.errors.into_iter().map(Err).collect();
        for session in resolved.sessions {
            results.push(self.driver.write(&session.session_id, bytes, false, false).await);
        }
        results
    }

    // ---- Agents & teams -------------------------------------------------

    pub async fn register_agent(
        &self,
        name: &str,
        binding: Option<String>,
        teams: IndexSet<String>,
        role: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<Agent, KernelError> {
        let agent = self.agents.register_agent(name, binding, teams, role, metadata).await?;
        self.persist_agent(&agent).await;
        Ok(agent)
    }

    pub async fn remove_agent(&self, name: &str) -> Result<(), KernelError> {
        self.agents.remove_agent(name).await
    }

    pub async fn list_agents(&self, team: Option<&str>) -> Vec<Agent> {
        self.agents.list_agents(team).await
    }

    pub async fn create_team(&self, name: &str, description: Option<String>) -> Result<Team, KernelError> {
        let team = self.agents.create_team(name, description).await?;
        self.persist_team(&team).await;
        Ok(team)
    }

    pub async fn remove_team(&self, name: &str, force: bool) -> Result<(), KernelError> {
        self.agents.remove_team(name, force).await
    }

    pub async fn assign_agent_to_team(&self, agent: &str, team: &str) -> Result<(), KernelError> {
        self.agents.assign(agent, team).await
    }

    pub async fn remove_agent_from_team(&self, agent: &str, team: &str) -> Result<(), KernelError> {
        self.agents.unassign(agent, team).await
    }

    pub async fn list_teams(&self) -> Vec<Team> {
        self.agents.list_teams().await
    }

    // ---- Locks ----------------------------------------------------------

    pub async fn lock_session(&self, agent: &str, session: &str, reason: Option<String>, ttl_secs: Option<u64>) -> Result<Lock, KernelError> {
        self.locks.acquire(session, agent, reason, ttl_secs).await
    }

    pub async fn unlock_session(&self, agent: &str, session: &str) -> Result<(), KernelError> {
        self.locks.release(session, agent).await
    }

    pub async fn request_session_access(&self, requester: &str, session: &str, owner: &str) -> AccessRequest {
        self.locks.request_access(session, requester, owner).await
    }

    pub async fn list_locks(&self) -> Vec<Lock> {
        self.locks.list().await
    }

    // ---- Notifications ----------------------------------------------------

    pub async fn notify(
        &self,
        agent: Option<String>,
        level: Level,
        summary: String,
        context: Option<String>,
        action_hint: Option<String>,
    ) -> Notification {
        let notification = self.notifications.add(agent, level, summary, context, action_hint).await;
        self.persist_notification(&notification).await;
        notification
    }

    pub async fn get_notifications(&self, agent: Option<&str>, level: Option<Level>, limit: usize) -> Vec<Notification> {
        self.notifications.get(level, agent, limit).await
    }

    pub async fn get_agent_status_summary(&self) -> Vec<String> {
        let latest = self.notifications.latest_per_agent().await;
        latest.iter().map(|(agent, n)| format_agent_line(agent, n)).collect()
    }

    pub async fn wait_for_agent(&self, agent: &str, wait_up_to_s: u64, return_output: bool, summary_on_timeout: bool) -> WaitForAgentResult {
        let start = self.clock.now_utc();
        let deadline = start + wait_up_to_s * 1000;
        loop {
            if let Some(n) = self.notifications.latest_per_agent().await.get(agent).cloned() {
                if n.created_at >= start {
                    let output = if return_output {
                        let read = self.read_sessions(vec![TargetDescriptor::Agent(agent.to_string())], false, None, None).await;
                        read.entries.first().map(|e| e.lines.join("\n"))
                    } else {
                        None
                    };
                    return WaitForAgentResult { notification: Some(n), timed_out: false, output, timeout_summary: None };
                }
            }
            if self.clock.now_utc() >= deadline {
                let timeout_summary = summary_on_timeout.then(|| format!("no notification from {agent} within {wait_up_to_s}s"));
                return WaitForAgentResult { notification: None, timed_out: true, output: None, timeout_summary };
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    // ---- Subscriptions ----------------------------------------------------

    pub async fn subscribe_to_output_pattern(
        &self,
        target: TargetDescriptor,
        regex: &str,
        event_name: &str,
    ) -> Result<SubscriptionId, KernelError> {
        let resolved = self.resolver.resolve(&[target]).await;
        let session = resolved.sessions.into_iter().next().ok_or_else(|| {
            resolved.errors.into_iter().next().unwrap_or_else(|| KernelError::not_found("session", "target"))
        })?;
        let compiled = Regex::new(regex).map_err(|e| KernelError::invalid("regex", e.to_string()))?;
        let handler = output_pattern_handler(Arc::clone(&self.events), event_name.to_string(), compiled);
        Ok(self.events.subscribe(format!("session.output.{}", session.session_id), handler).await)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), KernelError> {
        self.events.unsubscribe(id).await
    }

    // ---- Managers & plans ---------------------------------------------

    pub async fn create_manager(
        &self,
        name: &str,
        workers: Vec<String>,
        worker_roles: HashMap<String, String>,
        strategy: Strategy,
    ) -> Result<Manager, KernelError> {
        let manager = self.managers.create(name, workers, worker_roles, strategy).await?;
        self.persist_manager(&manager).await;
        Ok(manager)
    }

    pub async fn add_worker_to_manager(&self, manager: &str, worker: &str) -> Result<(), KernelError> {
        self.managers.add_worker(manager, worker).await
    }

    pub async fn remove_worker_from_manager(&self, manager: &str, worker: &str) -> Result<(), KernelError> {
        self.managers.remove_worker(manager, worker).await
    }

    pub async fn delegate_task(&self, manager: &str, task: &str, role: Option<String>) -> Result<PlanResult, KernelError> {
        let plan = Plan {
            name: format!("delegate:{manager}"),
            stop_on_failure: false,
            steps: vec![PlanStep {
                id: "ad-hoc".to_string(),
                task: task.to_string(),
                role,
                depends_on: Vec::new(),
                timeout_ms: 30_000,
                retries: 0,
                validation: None,
                parallel_group: None,
            }],
        };
        self.executor.execute(manager, plan, self.shutdown_token.clone()).await
    }

    pub async fn execute_plan(&self, manager: &str, plan: Plan) -> Result<PlanResult, KernelError> {
        self.executor.execute(manager, plan, self.shutdown_token.clone()).await
    }

    // ---- Roles ----------------------------------------------------------

    pub async fn assign_session_role(&self, session_persistent_id: &str, role: &str) -> Result<(), KernelError> {
        if !self.roles.read().await.contains_key(role) {
            return Err(KernelError::not_found("role", role));
        }
        self.session_roles.write().await.insert(session_persistent_id.to_string(), role.to_string());
        Ok(())
    }

    /// Sessions with no assigned role are unrestricted: default-allow, since
    /// role assignment here is opt-in hardening, not a deny-by-default gate.
    pub async fn check_tool_permission(&self, session_persistent_id: &str, tool_name: &str) -> bool {
        let Some(role_name) = self.session_roles.read().await.get(session_persistent_id).cloned() else {
            return true;
        };
        let roles = self.roles.read().await;
        roles
            .get(&role_name)
            .is_some_and(|role| role.allowed_tools.contains("*") || role.allowed_tools.contains(tool_name))
    }

    pub async fn list_available_roles(&self) -> Vec<String> {
        self.roles.read().await.keys().cloned().collect()
    }

    // ---- Feedback --------------------------------------------------------

    pub async fn record_feedback(&self, agent: Option<String>, summary: String) -> Result<String, KernelError> {
        let now = self.clock.now_utc();
        let feedback_id = new_feedback_id(now);
        let envelope = Envelope {
            kind: "feedback".to_string(),
            version: 1,
            data: serde_json::json!({"feedback_id": feedback_id, "agent": agent, "summary": summary}),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.persistence.append(LogFile::Feedback, &envelope) {
            self.mark_degraded("feedback", &e).await;
        }
        Ok(feedback_id)
    }

    // ---- Persistence helpers --------------------------------------------

    async fn persist_agent(&self, agent: &Agent) {
        let now = self.clock.now_utc();
        let envelope = Envelope { kind: "agent".to_string(), version: 1, data: agent.clone(), created_at: now, updated_at: now };
        if let Err(e) = self.persistence.append(LogFile::Agents, &envelope) {
            self.mark_degraded("agents", &e).await;
        }
    }

    async fn persist_team(&self, team: &Team) {
        let now = self.clock.now_utc();
        let envelope = Envelope { kind: "team".to_string(), version: 1, data: team.clone(), created_at: now, updated_at: now };
        if let Err(e) = self.persistence.append(LogFile::Teams, &envelope) {
            self.mark_degraded("teams", &e).await;
        }
    }

    async fn persist_manager(&self, manager: &Manager) {
        let now = self.clock.now_utc();
        let envelope = Envelope { kind: "manager".to_string(), version: 1, data: manager.clone(), created_at: now, updated_at: now };
        if let Err(e) = self.persistence.append(LogFile::Managers, &envelope) {
            self.mark_degraded("managers", &e).await;
        }
    }

    async fn persist_notification(&self, notification: &Notification) {
        let now = self.clock.now_utc();
        let envelope =
            Envelope { kind: "notification".to_string(), version: 1, data: notification.clone(), created_at: now, updated_at: now };
        if let Err(e) = self.persistence.append(LogFile::Notifications, &envelope) {
            self.mark_degraded("notifications", &e).await;
        }
    }

    async fn persist_sessions_snapshot(&self) {
        let snapshot = self.sessions.snapshot().await;
        if let Err(e) = self.persistence.write_sessions_snapshot(&snapshot) {
            self.mark_degraded("persistent_sessions", &e).await;
        }
    }

    async fn mark_degraded(&self, file: &str, error: &KernelError) {
        warn!(file, error = %error, "persistence write failed, in-memory state preserved");
        self.events
            .publish("persistence.degraded", serde_json::json!({"file": file, "error": error.to_string()}), Priority::High)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;

    fn test_config(dir: &std::path::Path) -> KernelConfig {
        KernelConfig {
            log_dir: Some(dir.to_path_buf()),
            default_max_lines: 1000,
            poll_interval_ms: 50,
            dedup_ttl_s: 300,
            dedup_max: 1024,
            dispatch_concurrency: 8,
            notify_max_per_agent: 100,
            notify_max_total: 1000,
            event_history: 64,
            log_format: "json".to_string(),
            log_level: "info".to_string(),
        }
    }

    async fn facade() -> (Facade, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let driver = Arc::new(RecordingDriver::new());
        let facade = Facade::new(driver, config).await.unwrap();
        (facade, dir)
    }

    #[tokio::test]
    async fn scenario_s3_lock_blocks_peer_then_unlocks() {
        let (facade, _dir) = facade().await;
        let session = facade.create_one_session(&SessionConfig {
            name: "s1".into(),
            agent: None,
            agent_type: None,
            team: None,
            profile: None,
            command: None,
            monitor: None,
            role: None,
        })
        .await
        .unwrap();

        facade.lock_session("alice", &session.persistent_id, None, None).await.unwrap();

        let message = WriteMessage {
            content: "rm -rf /".into(),
            targets: vec![TargetDescriptor::Name("s1".into())],
            execute_enter: false,
            use_encoding: false,
        };
        let result = facade.write_to_sessions(vec![message.clone()], true, false, None, Some("bob")).await.unwrap();
        assert_eq!(result.entries[0].error, Some(KernelError::LockedBy { owner: "alice".into() }));

        facade.unlock_session("alice", &session.persistent_id).await.unwrap();
        let result = facade.write_to_sessions(vec![message], true, false, None, Some("bob")).await.unwrap();
        assert!(result.entries[0].error.is_none());
    }

    #[tokio::test]
    async fn check_tool_permission_defaults_to_allowed_when_unassigned() {
        let (facade, _dir) = facade().await;
        assert!(facade.check_tool_permission("nonexistent", "write_to_sessions").await);
    }

    #[tokio::test]
    async fn assign_session_role_restricts_to_role_tools() {
        let (facade, _dir) = facade().await;
        facade.assign_session_role("s1", "readonly").await.unwrap();
        assert!(facade.check_tool_permission("s1", "read_sessions").await);
        assert!(!facade.check_tool_permission("s1", "write_to_sessions").await);
    }

    #[tokio::test]
    async fn record_feedback_returns_stable_id_shape() {
        let (facade, _dir) = facade().await;
        let id = facade.record_feedback(Some("alice".into()), "looks good".into()).await.unwrap();
        assert!(id.starts_with("fb-"));
    }
}
