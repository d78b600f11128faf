// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan Executor (component K): manager/worker coordination and DAG-scheduled
//! plan runs with retry, worker-selection strategies, and cascading skip on
//! failure.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::driver::BoxFuture;
use crate::error::KernelError;
use crate::event::{EventBus, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    RoleBased,
    LeastBusy,
    Priority,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manager {
    pub name: String,
    pub workers: Vec<String>,
    pub worker_roles: HashMap<String, String>,
    pub strategy: Strategy,
    pub round_robin_cursor: usize,
}

pub struct ManagerRegistry {
    managers: RwLock<HashMap<String, Manager>>,
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self { managers: RwLock::new(HashMap::new()) }
    }

    pub async fn restore(&self, managers: Vec<Manager>) {
        let mut map = self.managers.write().await;
        for m in managers {
            map.insert(m.name.clone(), m);
        }
    }

    pub async fn create(
        &self,
        name: &str,
        workers: Vec<String>,
        worker_roles: HashMap<String, String>,
        strategy: Strategy,
    ) -> Result<Manager, KernelError> {
        let mut map = self.managers.write().await;
        if map.contains_key(name) {
            return Err(KernelError::NameConflict { name: name.to_string() });
        }
        let manager = Manager { name: name.to_string(), workers, worker_roles, strategy, round_robin_cursor: 0 };
        map.insert(name.to_string(), manager.clone());
        Ok(manager)
    }

    pub async fn add_worker(&self, name: &str, worker: &str) -> Result<(), KernelError> {
        let mut map = self.managers.write().await;
        let manager = map.get_mut(name).ok_or_else(|| KernelError::not_found("manager", name))?;
        if !manager.workers.iter().any(|w| w == worker) {
            manager.workers.push(worker.to_string());
        }
        Ok(())
    }

    pub async fn remove_worker(&self, name: &str, worker: &str) -> Result<(), KernelError> {
        let mut map = self.managers.write().await;
        let manager = map.get_mut(name).ok_or_else(|| KernelError::not_found("manager", name))?;
        manager.workers.retain(|w| w != worker);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Manager> {
        self.managers.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Manager> {
        self.managers.read().await.values().cloned().collect()
    }

    async fn take_round_robin_cursor(&self, name: &str, available: usize) -> Result<usize, KernelError> {
        if available == 0 {
            return Err(KernelError::invalid("workers", "manager has no workers"));
        }
        let mut map = self.managers.write().await;
        let manager = map.get_mut(name).ok_or_else(|| KernelError::not_found("manager", name))?;
        let idx = manager.round_robin_cursor % available;
        manager.round_robin_cursor = (manager.round_robin_cursor + 1) % available;
        Ok(idx)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub steps: Vec<PlanStep>,
    pub stop_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub task: String,
    pub role: Option<String>,
    pub depends_on: Vec<String>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub validation: Option<String>,
    pub parallel_group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub id: String,
    pub state: StepState,
    pub worker: Option<String>,
    pub output: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_name: String,
    pub outcomes: Vec<StepOutcome>,
    pub failed: bool,
}

/// Runs one plan step against one worker. The dispatcher-backed
/// implementation lives in `facade.rs`; this trait lets `PlanExecutor` stay
/// agnostic of how a step's output is actually produced.
pub trait StepRunner: Send + Sync {
    fn run<'a>(&'a self, worker: &'a str, step: &'a PlanStep) -> BoxFuture<'a, Result<String, KernelError>>;
}

/// Validates step ids are unique, `depends_on` references resolve, and the
/// induced graph is acyclic. Returns steps grouped into dependency layers
/// (a valid topological order, coarsened to frontiers) on success.
fn validate_dag(plan: &Plan) -> Result<(), KernelError> {
    let mut seen = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(KernelError::invalid("steps", format!("duplicate step id: {}", step.id)));
        }
    }
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &plan.steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(KernelError::invalid("depends_on", format!("unknown step id: {dep}")));
            }
        }
    }

    // DFS cycle detection, reporting the first cycle found as a path.
    #[derive(PartialEq, Clone, Copy)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = plan.steps.iter().map(|s| (s.id.as_str(), Mark::Unvisited)).collect();
    let by_id: HashMap<&str, &PlanStep> = plan.steps.iter().map(|s| (s.id.as_str(), s)).collect();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a PlanStep>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), KernelError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InStack) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                path.push(id.to_string());
                return Err(KernelError::CycleError { path });
            }
            _ => {}
        }
        marks.insert(id, Mark::InStack);
        stack.push(id);
        if let Some(step) = by_id.get(id) {
            for dep in &step.depends_on {
                visit(dep.as_str(), by_id, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for step in &plan.steps {
        let mut stack = Vec::new();
        visit(step.id.as_str(), &by_id, &mut marks, &mut stack)?;
    }
    Ok(())
}

fn select_worker(
    manager: &Manager,
    step: &PlanStep,
    round_robin_index: Option<usize>,
    busy: &HashMap<String, usize>,
) -> Option<String> {
    let candidates: Vec<&String> = match manager.strategy {
        Strategy::RoleBased => {
            let filtered: Vec<&String> = manager
                .workers
                .iter()
                .filter(|w| step.role.as_deref().is_some_and(|r| manager.worker_roles.get(*w).map(String::as_str) == Some(r)))
                .collect();
            if filtered.is_empty() {
                manager.workers.iter().collect()
            } else {
                filtered
            }
        }
        _ => manager.workers.iter().collect(),
    };
    if candidates.is_empty() {
        return None;
    }

    match manager.strategy {
        Strategy::RoundRobin => round_robin_index.and_then(|i| candidates.get(i % candidates.len())).map(|s| s.to_string()),
        Strategy::RoleBased => round_robin_index.and_then(|i| candidates.get(i % candidates.len())).map(|s| s.to_string()),
        Strategy::LeastBusy => candidates
            .iter()
            .min_by_key(|w| busy.get(w.as_str()).copied().unwrap_or(0))
            .map(|s| s.to_string()),
        Strategy::Priority => candidates.first().map(|s| s.to_string()),
        Strategy::Random => {
            let idx = rand::rng().random_range(0..candidates.len());
            candidates.get(idx).map(|s| s.to_string())
        }
    }
}

pub struct PlanExecutor {
    managers: Arc<ManagerRegistry>,
    events: Arc<EventBus>,
    runner: Arc<dyn StepRunner>,
    concurrency_cap: usize,
}

impl PlanExecutor {
    pub fn new(
        managers: Arc<ManagerRegistry>,
        events: Arc<EventBus>,
        runner: Arc<dyn StepRunner>,
        concurrency_cap: usize,
    ) -> Self {
        Self { managers, events, runner, concurrency_cap }
    }

    pub async fn execute(&self, manager_name: &str, plan: Plan, cancel: CancellationToken) -> Result<PlanResult, KernelError> {
        validate_dag(&plan)?;
        let manager = self.managers.get(manager_name).await.ok_or_else(|| KernelError::not_found("manager", manager_name))?;

        let mut state: HashMap<String, StepState> = plan.steps.iter().map(|s| (s.id.clone(), StepState::Pending)).collect();
        let mut attempts_made: HashMap<String, u32> = HashMap::new();
        let mut outputs: HashMap<String, Option<String>> = HashMap::new();
        let mut used_worker: HashMap<String, Option<String>> = HashMap::new();
        let busy: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency_cap));

        let mut stop_requested = false;

        loop {
            if stop_requested || cancel.is_cancelled() {
                for step in &plan.steps {
                    if state[&step.id] == StepState::Pending {
                        state.insert(step.id.clone(), StepState::Skipped);
                    }
                }
                break;
            }

            let ready: Vec<&PlanStep> = plan
                .steps
                .iter()
                .filter(|s| state[&s.id] == StepState::Pending)
                .filter(|s| s.depends_on.iter().all(|d| state[d] == StepState::Succeeded))
                .collect();

            // Steps whose dependency has failed or been skipped can never
            // become ready; propagate the skip now so the loop terminates.
            for step in &plan.steps {
                if state[&step.id] != StepState::Pending {
                    continue;
                }
                let blocked = step
                    .depends_on
                    .iter()
                    .any(|d| matches!(state[d], StepState::Failed | StepState::Skipped));
                if blocked {
                    state.insert(step.id.clone(), StepState::Skipped);
                }
            }

            if ready.is_empty() {
                break;
            }

            // Dispatch one parallel group per round: steps sharing a
            // `parallel_group` run concurrently with each other, but not
            // with steps from a different group or with ungrouped steps
            // (each of which is a group of one). The group dispatched is
            // whichever the first ready step (in plan order) belongs to.
            let dispatch_group = ready[0].parallel_group.clone();
            let ready: Vec<&PlanStep> = ready.into_iter().filter(|s| s.parallel_group == dispatch_group).collect();

            for step in &ready {
                state.insert(step.id.clone(), StepState::Running);
                self.events
                    .publish(&format!("plan.step.{}", step.id), serde_json::json!({"state": "running"}), Priority::Normal)
                    .await;
            }

            let mut handles = Vec::with_capacity(ready.len());
            for (i, step) in ready.iter().enumerate() {
                let step = (*step).clone();
                let manager = manager.clone();
                let runner = Arc::clone(&self.runner);
                let events = Arc::clone(&self.events);
                let managers = Arc::clone(&self.managers);
                let busy = Arc::clone(&busy);
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    let round_robin_index = if matches!(manager.strategy, Strategy::RoundRobin | Strategy::RoleBased) {
                        managers.take_round_robin_cursor(&manager.name, manager.workers.len().max(1)).await.ok()
                    } else {
                        None
                    };
                    let busy_snapshot = busy.lock().await.clone();
                    let Some(worker) = select_worker(&manager, &step, round_robin_index, &busy_snapshot) else {
                        return (i, step.id.clone(), None, StepState::Failed, None::<String>, 0u32);
                    };

                    {
                        let mut busy = busy.lock().await;
                        *busy.entry(worker.clone()).or_insert(0) += 1;
                    }

                    let validation = step.validation.as_deref().map(Regex::new).transpose().ok().flatten();
                    let max_attempts = step.retries + 1;
                    let mut attempts = 0u32;
                    let mut last_output = None;
                    let mut final_state = StepState::Failed;

                    for attempt in 0..max_attempts {
                        if cancel.is_cancelled() {
                            break;
                        }
                        attempts = attempt + 1;
                        match runner.run(&worker, &step).await {
                            Ok(output) => {
                                let passed = validation.as_ref().map_or(true, |re| re.is_match(&output));
                                last_output = Some(output);
                                if passed {
                                    final_state = StepState::Succeeded;
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(step = %step.id, error = %e, attempt, "plan step failed");
                            }
                        }
                        if attempt + 1 < max_attempts {
                            let backoff_s = 1u64.checked_shl(attempt).unwrap_or(30).min(30);
                            tokio::time::sleep(Duration::from_secs(backoff_s)).await;
                            events
                                .publish(&format!("plan.step.{}", step.id), serde_json::json!({"state": "running", "retry": attempt + 1}), Priority::Normal)
                                .await;
                        }
                    }

                    {
                        let mut busy = busy.lock().await;
                        if let Some(c) = busy.get_mut(&worker) {
                            *c = c.saturating_sub(1);
                        }
                    }

                    (i, step.id.clone(), Some(worker), final_state, last_output, attempts)
                }));
            }

            let mut batch_failed = false;
            for handle in handles {
                if let Ok((_, id, worker, final_state, output, attempts)) = handle.await {
                    state.insert(id.clone(), final_state);
                    attempts_made.insert(id.clone(), attempts);
                    outputs.insert(id.clone(), output);
                    used_worker.insert(id.clone(), worker);
                    self.events
                        .publish(&format!("plan.step.{id}"), serde_json::json!({"state": format!("{final_state:?}").to_lowercase()}), Priority::Normal)
                        .await;
                    if final_state == StepState::Failed {
                        batch_failed = true;
                    }
                }
            }

            if batch_failed && plan.stop_on_failure {
                stop_requested = true;
            }
        }

        let outcomes: Vec<StepOutcome> = plan
            .steps
            .iter()
            .map(|s| StepOutcome {
                id: s.id.clone(),
                state: state[&s.id],
                worker: used_worker.get(&s.id).cloned().flatten(),
                output: outputs.get(&s.id).cloned().flatten(),
                attempts: attempts_made.get(&s.id).copied().unwrap_or(0),
            })
            .collect();

        let failed = outcomes.iter().any(|o| o.state == StepState::Failed);
        info!(plan = %plan.name, failed, "plan completed");
        self.events
            .publish("plan.completed", serde_json::json!({"plan": plan.name, "failed": failed}), Priority::High)
            .await;

        Ok(PlanResult { plan_name: plan.name, outcomes, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SystemClock;
    use std::sync::atomic::AtomicU32;

    fn step(id: &str, depends_on: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            task: "noop".to_string(),
            role: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            timeout_ms: 1000,
            retries: 0,
            validation: None,
            parallel_group: None,
        }
    }

    struct AlwaysOk;
    impl StepRunner for AlwaysOk {
        fn run<'a>(&'a self, _worker: &'a str, _step: &'a PlanStep) -> BoxFuture<'a, Result<String, KernelError>> {
            Box::pin(async { Ok("PASS".to_string()) })
        }
    }

    fn executor(runner: Arc<dyn StepRunner>) -> (PlanExecutor, Arc<ManagerRegistry>) {
        let managers = Arc::new(ManagerRegistry::new());
        let events = Arc::new(EventBus::new(64, Arc::new(SystemClock::new())));
        let executor = PlanExecutor::new(Arc::clone(&managers), events, runner, 8);
        (executor, managers)
    }

    #[test]
    fn cycle_is_rejected_with_path() {
        let plan = Plan {
            name: "p".into(),
            stop_on_failure: false,
            steps: vec![step("a", &["b"]), step("b", &["a"])],
        };
        let err = validate_dag(&plan).unwrap_err();
        assert!(matches!(err, KernelError::CycleError { .. }));
    }

    #[tokio::test]
    async fn scenario_s5_cycle_rejection_via_execute() {
        let (executor, managers) = executor(Arc::new(AlwaysOk));
        managers.create("mgr", vec!["w1".into()], HashMap::new(), Strategy::RoundRobin).await.unwrap();
        let plan = Plan { name: "p".into(), stop_on_failure: false, steps: vec![step("a", &["b"]), step("b", &["a"])] };
        let err = executor.execute("mgr", plan, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, KernelError::CycleError { .. }));
    }

    #[tokio::test]
    async fn scenario_s4_retry_then_succeed() {
        struct FailThenPass(AtomicU32);
        impl StepRunner for FailThenPass {
            fn run<'a>(&'a self, _worker: &'a str, step: &'a PlanStep) -> BoxFuture<'a, Result<String, KernelError>> {
                Box::pin(async move {
                    if step.id == "test" {
                        let call = self.0.fetch_add(1, Ordering::SeqCst);
                        if call == 0 {
                            return Ok("FAIL".to_string());
                        }
                    }
                    Ok("PASS".to_string())
                })
            }
        }

        let (executor, managers) = executor(Arc::new(FailThenPass(AtomicU32::new(0))));
        managers.create("mgr", vec!["w1".into()], HashMap::new(), Strategy::RoundRobin).await.unwrap();

        let mut test_step = step("test", &["build"]);
        test_step.retries = 2;
        test_step.validation = Some("PASS".to_string());
        let plan = Plan {
            name: "p".into(),
            stop_on_failure: false,
            steps: vec![step("build", &[]), test_step, step("deploy", &["test"])],
        };

        let result = executor.execute("mgr", plan, CancellationToken::new()).await.unwrap();
        assert!(!result.failed);
        let by_id: HashMap<String, StepOutcome> = result.outcomes.into_iter().map(|o| (o.id.clone(), o)).collect();
        assert_eq!(by_id["build"].state, StepState::Succeeded);
        assert_eq!(by_id["test"].state, StepState::Succeeded);
        assert_eq!(by_id["test"].attempts, 2);
        assert_eq!(by_id["deploy"].state, StepState::Succeeded);
    }

    #[tokio::test]
    async fn stop_on_failure_skips_downstream() {
        struct AlwaysFail;
        impl StepRunner for AlwaysFail {
            fn run<'a>(&'a self, _worker: &'a str, _step: &'a PlanStep) -> BoxFuture<'a, Result<String, KernelError>> {
                Box::pin(async { Ok("nope".to_string()) })
            }
        }

        let (executor, managers) = executor(Arc::new(AlwaysFail));
        managers.create("mgr", vec!["w1".into()], HashMap::new(), Strategy::RoundRobin).await.unwrap();

        let mut build = step("build", &[]);
        build.validation = Some("PASS".to_string());
        let plan = Plan {
            name: "p".into(),
            stop_on_failure: true,
            steps: vec![build, step("deploy", &["build"])],
        };

        let result = executor.execute("mgr", plan, CancellationToken::new()).await.unwrap();
        assert!(result.failed);
        let by_id: HashMap<String, StepOutcome> = result.outcomes.into_iter().map(|o| (o.id.clone(), o)).collect();
        assert_eq!(by_id["build"].state, StepState::Failed);
        assert_eq!(by_id["deploy"].state, StepState::Skipped);
    }

    #[tokio::test]
    async fn parallel_group_serializes_across_groups() {
        struct GroupRecorder {
            start: tokio::time::Instant,
            starts: Mutex<Vec<(String, u128)>>,
        }
        impl StepRunner for GroupRecorder {
            fn run<'a>(&'a self, _worker: &'a str, step: &'a PlanStep) -> BoxFuture<'a, Result<String, KernelError>> {
                Box::pin(async move {
                    let elapsed = self.start.elapsed().as_millis();
                    self.starts.lock().await.push((step.id.clone(), elapsed));
                    if step.id != "c" {
                        tokio::time::sleep(Duration::from_millis(60)).await;
                    }
                    Ok("PASS".to_string())
                })
            }
        }

        let recorder = Arc::new(GroupRecorder { start: tokio::time::Instant::now(), starts: Mutex::new(Vec::new()) });
        let (executor, managers) = executor(Arc::clone(&recorder) as Arc<dyn StepRunner>);
        managers.create("mgr", vec!["w1".into(), "w2".into(), "w3".into()], HashMap::new(), Strategy::RoundRobin).await.unwrap();

        let mut a = step("a", &[]);
        a.parallel_group = Some("g1".into());
        let mut b = step("b", &[]);
        b.parallel_group = Some("g1".into());
        let mut c = step("c", &[]);
        c.parallel_group = Some("g2".into());

        let plan = Plan { name: "p".into(), stop_on_failure: false, steps: vec![a, b, c] };
        let result = executor.execute("mgr", plan, CancellationToken::new()).await.unwrap();
        assert!(!result.failed);

        let starts = recorder.starts.lock().await;
        let at = |id: &str| starts.iter().find(|(s, _)| s == id).unwrap().1;
        // a and b share a group and dispatch in the same round.
        assert!(at("a") < 20, "a should start immediately, started at {}ms", at("a"));
        assert!(at("b") < 20, "b should start immediately, started at {}ms", at("b"));
        // c is a separate group and must wait for g1's round to finish.
        assert!(at("c") >= 55, "c should wait for group g1 to finish, started at {}ms", at("c"));
    }

    #[test]
    fn round_robin_selection_cycles_through_workers() {
        let manager = Manager {
            name: "mgr".into(),
            workers: vec!["a".into(), "b".into(), "c".into()],
            worker_roles: HashMap::new(),
            strategy: Strategy::RoundRobin,
            round_robin_cursor: 0,
        };
        let s = step("x", &[]);
        assert_eq!(select_worker(&manager, &s, Some(0), &HashMap::new()), Some("a".to_string()));
        assert_eq!(select_worker(&manager, &s, Some(1), &HashMap::new()), Some("b".to_string()));
        assert_eq!(select_worker(&manager, &s, Some(2), &HashMap::new()), Some("c".to_string()));
    }

    #[test]
    fn least_busy_picks_fewest_in_flight() {
        let manager = Manager {
            name: "mgr".into(),
            workers: vec!["a".into(), "b".into()],
            worker_roles: HashMap::new(),
            strategy: Strategy::LeastBusy,
            round_robin_cursor: 0,
        };
        let s = step("x", &[]);
        let mut busy = HashMap::new();
        busy.insert("a".to_string(), 3);
        busy.insert("b".to_string(), 1);
        assert_eq!(select_worker(&manager, &s, None, &busy), Some("b".to_string()));
    }

    #[test]
    fn role_based_falls_back_to_all_workers_when_no_match() {
        let mut roles = HashMap::new();
        roles.insert("a".to_string(), "frontend".to_string());
        let manager = Manager {
            name: "mgr".into(),
            workers: vec!["a".into(), "b".into()],
            worker_roles: roles,
            strategy: Strategy::RoleBased,
            round_robin_cursor: 0,
        };
        let mut s = step("x", &[]);
        s.role = Some("backend".to_string());
        // No worker has role "backend"; falls back to all workers, index 0.
        assert_eq!(select_worker(&manager, &s, Some(0), &HashMap::new()), Some("a".to_string()));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn step(id: String, depends_on: Vec<String>) -> PlanStep {
        PlanStep { id, task: "noop".to_string(), role: None, depends_on, timeout_ms: 1000, retries: 0, validation: None, parallel_group: None }
    }

    proptest! {
        /// A step whose `depends_on` only ever points at earlier-indexed
        /// steps induces a forward DAG by construction; validation must
        /// always accept it regardless of which earlier steps it names.
        #[test]
        fn forward_only_dependencies_always_validate(n in 1usize..15, mask in 0u64..u64::MAX) {
            let steps: Vec<PlanStep> = (0..n)
                .map(|i| {
                    let depends_on = (0..i).filter(|j| (mask >> (*j % 64)) & 1 == 1).map(|j| format!("s{j}")).collect();
                    step(format!("s{i}"), depends_on)
                })
                .collect();
            let plan = Plan { name: "p".into(), steps, stop_on_failure: false };
            assert!(validate_dag(&plan).is_ok());
        }

        /// Adding one back-edge from the last step to the first always turns
        /// an otherwise-forward graph into a rejected cycle.
        #[test]
        fn back_edge_is_always_rejected(n in 2usize..15) {
            let mut steps: Vec<PlanStep> = (0..n).map(|i| step(format!("s{i}"), (0..i).map(|j| format!("s{j}")).collect())).collect();
            let last = steps.len() - 1;
            steps[0].depends_on.push(format!("s{last}"));
            let plan = Plan { name: "p".into(), steps, stop_on_failure: false };
            assert!(matches!(validate_dag(&plan), Err(KernelError::CycleError { .. })));
        }
    }
}
