// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: exposes every Orchestration Façade operation as a JSON
//! endpoint. Thin by design — handlers parse the request, call the façade,
//! and serialize the result; no business logic lives here.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use orchkernel::agent::{Agent, Team};
use orchkernel::dispatch::{CascadeRequest, CascadeResult, ReadResult, WriteMessage, WriteResult};
use orchkernel::error::KernelError;
use orchkernel::event::SubscriptionId;
use orchkernel::facade::{Facade, SessionConfig, SessionCreationResult, SessionModification, WaitForAgentResult};
use orchkernel::lock::{AccessRequest, Lock};
use orchkernel::notify::{Level, Notification};
use orchkernel::plan::{Manager, Plan, PlanResult, Strategy};
use orchkernel::resolver::TargetDescriptor;
use orchkernel::session::{Session, SessionFilter};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

/// Wraps a `KernelError` so it serializes as `{"error": {"kind": ..., ...}}`
/// with the matching HTTP status, mirroring the façade's own error shape.
struct ApiError(KernelError);

impl From<KernelError> for ApiError {
    fn from(e: KernelError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({"error": self.0}))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn build_router(facade: Arc<Facade>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/sessions", post(create_sessions).get(list_sessions))
        .route("/api/v1/sessions/split", post(split_session))
        .route("/api/v1/sessions/modify", post(modify_sessions))
        .route("/api/v1/sessions/tags", post(set_session_tags))
        .route("/api/v1/sessions/by-tag/{tag}", get(query_sessions_by_tag))
        .route("/api/v1/sessions/active", post(set_active_session))
        .route("/api/v1/sessions/focus", post(focus_session))
        .route("/api/v1/dispatch/write", post(write_to_sessions))
        .route("/api/v1/dispatch/read", post(read_sessions))
        .route("/api/v1/dispatch/cascade", post(send_cascade_message))
        .route("/api/v1/dispatch/control", post(send_control_character))
        .route("/api/v1/dispatch/key", post(send_special_key))
        .route("/api/v1/agents", post(register_agent).get(list_agents))
        .route("/api/v1/agents/{name}", delete(remove_agent))
        .route("/api/v1/agents/{name}/wait", get(wait_for_agent))
        .route("/api/v1/agents/status", get(get_agent_status_summary))
        .route("/api/v1/teams", post(create_team).get(list_teams))
        .route("/api/v1/teams/{name}", delete(remove_team))
        .route("/api/v1/teams/assign", post(assign_agent_to_team))
        .route("/api/v1/teams/unassign", post(remove_agent_from_team))
        .route("/api/v1/locks", post(lock_session).get(list_locks))
        .route("/api/v1/locks/unlock", post(unlock_session))
        .route("/api/v1/locks/request-access", post(request_session_access))
        .route("/api/v1/notifications", post(notify).get(get_notifications))
        .route("/api/v1/subscriptions", post(subscribe_to_output_pattern))
        .route("/api/v1/subscriptions/{id}", delete(unsubscribe))
        .route("/api/v1/managers", post(create_manager))
        .route("/api/v1/managers/workers", post(add_worker_to_manager))
        .route("/api/v1/managers/workers/remove", post(remove_worker_from_manager))
        .route("/api/v1/managers/delegate", post(delegate_task))
        .route("/api/v1/managers/execute-plan", post(execute_plan))
        .route("/api/v1/roles", get(list_available_roles))
        .route("/api/v1/roles/assign", post(assign_session_role))
        .route("/api/v1/roles/check", post(check_tool_permission))
        .route("/api/v1/feedback", post(record_feedback))
        .layer(CorsLayer::permissive())
        .with_state(facade)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "running" })
}

// ---- Sessions --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateSessionsRequest {
    sessions: Vec<SessionConfig>,
    #[serde(default)]
    layout: Option<String>,
}

async fn create_sessions(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<CreateSessionsRequest>,
) -> Json<Vec<SessionCreationResult>> {
    Json(facade.create_sessions(req.sessions, req.layout).await)
}

async fn list_sessions(State(facade): State<Arc<Facade>>, Query(filter): Query<SessionFilterQuery>) -> Json<Vec<Session>> {
    let filter = SessionFilter {
        name_prefix: filter.name_prefix,
        tag: filter.tag,
        live_only: filter.live_only.unwrap_or(false),
        agent: filter.agent,
        agents_only: filter.agents_only.unwrap_or(false),
    };
    Json(facade.list_sessions(filter).await)
}

#[derive(Debug, Deserialize)]
struct SessionFilterQuery {
    name_prefix: Option<String>,
    tag: Option<String>,
    live_only: Option<bool>,
    agent: Option<String>,
    agents_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SplitSessionRequest {
    target: TargetDescriptor,
    direction: String,
    name: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    monitor: bool,
}

async fn split_session(State(facade): State<Arc<Facade>>, Json(req): Json<SplitSessionRequest>) -> ApiResult<Session> {
    let session = facade
        .split_session(req.target, &req.direction, &req.name, req.agent, req.team, req.command, req.monitor)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ModifySessionsRequest {
    modifications: Vec<SessionModification>,
}

async fn modify_sessions(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<ModifySessionsRequest>,
) -> Json<Vec<ApiErrorBody>> {
    let results = facade.modify_sessions(req.modifications).await;
    Json(results.into_iter().map(|r| ApiErrorBody(r.err())).collect())
}

/// Serializes `Option<KernelError>` as `null` on success, matching
/// per-target error shapes used across the façade's batch operations.
#[derive(Debug, Serialize)]
struct ApiErrorBody(Option<KernelError>);

#[derive(Debug, Deserialize)]
struct SetSessionTagsRequest {
    persistent_id: String,
    tags: Vec<String>,
}

async fn set_session_tags(State(facade): State<Arc<Facade>>, Json(req): Json<SetSessionTagsRequest>) -> ApiResult<()> {
    facade.set_session_tags(&req.persistent_id, req.tags.into_iter().collect()).await?;
    Ok(Json(()))
}

async fn query_sessions_by_tag(State(facade): State<Arc<Facade>>, Path(tag): Path<String>) -> Json<Vec<Session>> {
    Json(facade.query_sessions_by_tag(&tag).await)
}

#[derive(Debug, Deserialize)]
struct TargetRequest {
    target: TargetDescriptor,
}

async fn set_active_session(State(facade): State<Arc<Facade>>, Json(req): Json<TargetRequest>) -> ApiResult<()> {
    facade.set_active_session(req.target).await?;
    Ok(Json(()))
}

async fn focus_session(State(facade): State<Arc<Facade>>, Json(req): Json<TargetRequest>) -> ApiResult<()> {
    facade.focus_session(req.target).await?;
    Ok(Json(()))
}

// ---- Dispatch ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WriteRequest {
    messages: Vec<WriteMessage>,
    #[serde(default)]
    parallel: bool,
    #[serde(default)]
    skip_duplicates: bool,
    #[serde(default)]
    send_conditions: Option<HashMap<String, TargetDescriptor>>,
    #[serde(default)]
    caller: Option<String>,
}

async fn write_to_sessions(State(facade): State<Arc<Facade>>, Json(req): Json<WriteRequest>) -> ApiResult<WriteResult> {
    let result = facade
        .write_to_sessions(req.messages, req.parallel, req.skip_duplicates, req.send_conditions, req.caller.as_deref())
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ReadRequest {
    targets: Vec<TargetDescriptor>,
    #[serde(default)]
    parallel: bool,
    #[serde(default)]
    filter_pattern: Option<String>,
    #[serde(default)]
    max_lines: Option<usize>,
}

async fn read_sessions(State(facade): State<Arc<Facade>>, Json(req): Json<ReadRequest>) -> Json<ReadResult> {
    Json(facade.read_sessions(req.targets, req.parallel, req.filter_pattern.as_deref(), req.max_lines).await)
}

async fn send_cascade_message(State(facade): State<Arc<Facade>>, Json(req): Json<CascadeRequest>) -> Json<CascadeResult> {
    Json(facade.send_cascade_message(req).await)
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    target: TargetDescriptor,
    letter: char,
}

async fn send_control_character(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<ControlRequest>,
) -> Json<Vec<ApiErrorBody>> {
    let results = facade.send_control_character(req.target, req.letter).await;
    Json(results.into_iter().map(|r| ApiErrorBody(r.err())).collect())
}

#[derive(Debug, Deserialize)]
struct SpecialKeyRequest {
    target: TargetDescriptor,
    key: String,
}

async fn send_special_key(State(facade): State<Arc<Facade>>, Json(req): Json<SpecialKeyRequest>) -> Json<Vec<ApiErrorBody>> {
    let results = facade.send_special_key(req.target, &req.key).await;
    Json(results.into_iter().map(|r| ApiErrorBody(r.err())).collect())
}

// ---- Agents & teams ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    name: String,
    #[serde(default)]
    binding: Option<String>,
    #[serde(default)]
    teams: Vec<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

async fn register_agent(State(facade): State<Arc<Facade>>, Json(req): Json<RegisterAgentRequest>) -> ApiResult<Agent> {
    let agent =
        facade.register_agent(&req.name, req.binding, req.teams.into_iter().collect(), req.role, req.metadata).await?;
    Ok(Json(agent))
}

async fn remove_agent(State(facade): State<Arc<Facade>>, Path(name): Path<String>) -> ApiResult<()> {
    facade.remove_agent(&name).await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
struct TeamQuery {
    team: Option<String>,
}

async fn list_agents(State(facade): State<Arc<Facade>>, Query(q): Query<TeamQuery>) -> Json<Vec<Agent>> {
    Json(facade.list_agents(q.team.as_deref()).await)
}

async fn get_agent_status_summary(State(facade): State<Arc<Facade>>) -> Json<Vec<String>> {
    Json(facade.get_agent_status_summary().await)
}

#[derive(Debug, Deserialize)]
struct WaitForAgentQuery {
    #[serde(default = "default_wait_s")]
    wait_up_to_s: u64,
    #[serde(default)]
    return_output: bool,
    #[serde(default)]
    summary_on_timeout: bool,
}

fn default_wait_s() -> u64 {
    30
}

async fn wait_for_agent(
    State(facade): State<Arc<Facade>>,
    Path(agent): Path<String>,
    Query(q): Query<WaitForAgentQuery>,
) -> Json<WaitForAgentResult> {
    Json(facade.wait_for_agent(&agent, q.wait_up_to_s, q.return_output, q.summary_on_timeout).await)
}

#[derive(Debug, Deserialize)]
struct CreateTeamRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_team(State(facade): State<Arc<Facade>>, Json(req): Json<CreateTeamRequest>) -> ApiResult<Team> {
    let team = facade.create_team(&req.name, req.description).await?;
    Ok(Json(team))
}

#[derive(Debug, Deserialize)]
struct RemoveTeamQuery {
    #[serde(default)]
    force: bool,
}

async fn remove_team(
    State(facade): State<Arc<Facade>>,
    Path(name): Path<String>,
    Query(q): Query<RemoveTeamQuery>,
) -> ApiResult<()> {
    facade.remove_team(&name, q.force).await?;
    Ok(Json(()))
}

async fn list_teams(State(facade): State<Arc<Facade>>) -> Json<Vec<Team>> {
    Json(facade.list_teams().await)
}

#[derive(Debug, Deserialize)]
struct TeamMembershipRequest {
    agent: String,
    team: String,
}

async fn assign_agent_to_team(State(facade): State<Arc<Facade>>, Json(req): Json<TeamMembershipRequest>) -> ApiResult<()> {
    facade.assign_agent_to_team(&req.agent, &req.team).await?;
    Ok(Json(()))
}

async fn remove_agent_from_team(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<TeamMembershipRequest>,
) -> ApiResult<()> {
    facade.remove_agent_from_team(&req.agent, &req.team).await?;
    Ok(Json(()))
}

// ---- Locks --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LockRequest {
    agent: String,
    session: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    ttl_secs: Option<u64>,
}

async fn lock_session(State(facade): State<Arc<Facade>>, Json(req): Json<LockRequest>) -> ApiResult<Lock> {
    let lock = facade.lock_session(&req.agent, &req.session, req.reason, req.ttl_secs).await?;
    Ok(Json(lock))
}

#[derive(Debug, Deserialize)]
struct UnlockRequest {
    agent: String,
    session: String,
}

async fn unlock_session(State(facade): State<Arc<Facade>>, Json(req): Json<UnlockRequest>) -> ApiResult<()> {
    facade.unlock_session(&req.agent, &req.session).await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
struct RequestAccessRequest {
    requester: String,
    session: String,
    owner: String,
}

async fn request_session_access(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<RequestAccessRequest>,
) -> Json<AccessRequest> {
    Json(facade.request_session_access(&req.requester, &req.session, &req.owner).await)
}

async fn list_locks(State(facade): State<Arc<Facade>>) -> Json<Vec<Lock>> {
    Json(facade.list_locks().await)
}

// ---- Notifications --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    #[serde(default)]
    agent: Option<String>,
    level: Level,
    summary: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    action_hint: Option<String>,
}

async fn notify(State(facade): State<Arc<Facade>>, Json(req): Json<NotifyRequest>) -> Json<Notification> {
    Json(facade.notify(req.agent, req.level, req.summary, req.context, req.action_hint).await)
}

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    agent: Option<String>,
    level: Option<Level>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn get_notifications(State(facade): State<Arc<Facade>>, Query(q): Query<NotificationsQuery>) -> Json<Vec<Notification>> {
    Json(facade.get_notifications(q.agent.as_deref(), q.level, q.limit).await)
}

// ---- Subscriptions --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    target: TargetDescriptor,
    regex: String,
    event_name: String,
}

#[derive(Debug, Serialize)]
struct SubscribeResponse {
    subscription_id: SubscriptionId,
}

async fn subscribe_to_output_pattern(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<SubscribeResponse> {
    let id = facade.subscribe_to_output_pattern(req.target, &req.regex, &req.event_name).await?;
    Ok(Json(SubscribeResponse { subscription_id: id }))
}

async fn unsubscribe(State(facade): State<Arc<Facade>>, Path(id): Path<u64>) -> ApiResult<()> {
    facade.unsubscribe(id).await?;
    Ok(Json(()))
}

// ---- Managers & plans --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateManagerRequest {
    name: String,
    workers: Vec<String>,
    #[serde(default)]
    worker_roles: HashMap<String, String>,
    #[serde(default = "default_strategy")]
    strategy: Strategy,
}

fn default_strategy() -> Strategy {
    Strategy::RoundRobin
}

async fn create_manager(State(facade): State<Arc<Facade>>, Json(req): Json<CreateManagerRequest>) -> ApiResult<Manager> {
    let manager = facade.create_manager(&req.name, req.workers, req.worker_roles, req.strategy).await?;
    Ok(Json(manager))
}

#[derive(Debug, Deserialize)]
struct ManagerWorkerRequest {
    manager: String,
    worker: String,
}

async fn add_worker_to_manager(State(facade): State<Arc<Facade>>, Json(req): Json<ManagerWorkerRequest>) -> ApiResult<()> {
    facade.add_worker_to_manager(&req.manager, &req.worker).await?;
    Ok(Json(()))
}

async fn remove_worker_from_manager(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<ManagerWorkerRequest>,
) -> ApiResult<()> {
    facade.remove_worker_from_manager(&req.manager, &req.worker).await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
struct DelegateTaskRequest {
    manager: String,
    task: String,
    #[serde(default)]
    role: Option<String>,
}

async fn delegate_task(State(facade): State<Arc<Facade>>, Json(req): Json<DelegateTaskRequest>) -> ApiResult<PlanResult> {
    let result = facade.delegate_task(&req.manager, &req.task, req.role).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ExecutePlanRequest {
    manager: String,
    plan: Plan,
}

async fn execute_plan(State(facade): State<Arc<Facade>>, Json(req): Json<ExecutePlanRequest>) -> ApiResult<PlanResult> {
    let result = facade.execute_plan(&req.manager, req.plan).await?;
    Ok(Json(result))
}

// ---- Roles --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AssignRoleRequest {
    session_persistent_id: String,
    role: String,
}

async fn assign_session_role(State(facade): State<Arc<Facade>>, Json(req): Json<AssignRoleRequest>) -> ApiResult<()> {
    facade.assign_session_role(&req.session_persistent_id, &req.role).await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
struct CheckPermissionRequest {
    session_persistent_id: String,
    tool_name: String,
}

#[derive(Debug, Serialize)]
struct CheckPermissionResponse {
    allowed: bool,
}

async fn check_tool_permission(
    State(facade): State<Arc<Facade>>,
    Json(req): Json<CheckPermissionRequest>,
) -> Json<CheckPermissionResponse> {
    let allowed = facade.check_tool_permission(&req.session_persistent_id, &req.tool_name).await;
    Json(CheckPermissionResponse { allowed })
}

async fn list_available_roles(State(facade): State<Arc<Facade>>) -> Json<Vec<String>> {
    Json(facade.list_available_roles().await)
}

// ---- Feedback --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    #[serde(default)]
    agent: Option<String>,
    summary: String,
}

#[derive(Debug, Serialize)]
struct FeedbackResponse {
    feedback_id: String,
}

async fn record_feedback(State(facade): State<Arc<Facade>>, Json(req): Json<FeedbackRequest>) -> ApiResult<FeedbackResponse> {
    let feedback_id = facade.record_feedback(req.agent, req.summary).await?;
    Ok(Json(FeedbackResponse { feedback_id }))
}
