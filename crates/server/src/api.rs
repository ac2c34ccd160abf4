use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use faultdesk_core::chain::ReviewDecision;
use faultdesk_core::domain::action::{ActionId, ActionPriority, ActionStatus};
use faultdesk_core::domain::site_record::ObservationStatus;
use faultdesk_core::errors::{ApplicationError, InterfaceError};
use faultdesk_workflow::{RoutingRequest, StatusUpdate, WorkflowService};

type ApiState = Arc<WorkflowService>;
type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(service: ApiState) -> Router {
    Router::new()
        .route("/api/actions", post(submit_routing).get(list_actions))
        .route("/api/actions/{id}/status", post(update_status))
        .route("/api/actions/{id}/reroute", post(reroute))
        .route("/api/actions/{id}", delete(delete_action))
        .route("/api/approvals", get(list_approvals))
        .route("/api/sites", get(list_sites))
        .route("/api/sites/resolve", post(resolve_site))
        .route("/api/overrides/refresh", post(refresh_overrides))
        .with_state(service)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: &'static str,
    correlation_id: String,
}

fn map_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = error.into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = ErrorBody {
        error: interface.to_string(),
        message: interface.user_message(),
        correlation_id: interface.correlation_id().to_string(),
    };

    (status, Json(body))
}

fn bad_request(detail: &str, correlation_id: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: format!("bad request: {detail}"),
            message: "The request could not be processed. Check inputs and try again.",
            correlation_id: correlation_id.to_string(),
        }),
    )
}

fn actor_from(headers: &HeaderMap, correlation_id: &str) -> Result<String, ApiError> {
    headers
        .get("x-actor-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| bad_request("missing x-actor-id header", correlation_id))
}

fn correlation_from(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[derive(Debug, Deserialize)]
struct SubmitRoutingBody {
    team_label: String,
    issue_type: String,
    row: BTreeMap<String, String>,
    row_key: String,
    source_file_id: String,
    priority: Option<String>,
    remark: Option<String>,
}

async fn submit_routing(
    State(service): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<SubmitRoutingBody>,
) -> Result<(StatusCode, Json<faultdesk_core::Action>), ApiError> {
    let correlation_id = correlation_from(&headers);
    let actor = actor_from(&headers, &correlation_id)?;

    let priority = match body.priority.as_deref() {
        None => ActionPriority::Normal,
        Some(raw) => ActionPriority::parse(raw)
            .ok_or_else(|| bad_request("unknown priority", &correlation_id))?,
    };

    let action = service
        .submit_routing(
            RoutingRequest {
                team_label: body.team_label,
                issue_type: body.issue_type,
                row: body.row,
                row_key: body.row_key,
                source_file_id: body.source_file_id,
                priority,
                remark: body.remark,
            },
            &actor,
            &correlation_id,
        )
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok((StatusCode::CREATED, Json(action)))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    decision: Option<ReviewDecision>,
    remarks: Option<String>,
}

async fn update_status(
    State(service): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<Json<faultdesk_core::Action>, ApiError> {
    let correlation_id = correlation_from(&headers);
    let actor = actor_from(&headers, &correlation_id)?;
    let status = ActionStatus::parse(&body.status)
        .ok_or_else(|| bad_request("unknown status", &correlation_id))?;

    let action = service
        .update_action_status(
            &ActionId(id),
            &actor,
            StatusUpdate { status, decision: body.decision, remarks: body.remarks },
            &correlation_id,
        )
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(Json(action))
}

#[derive(Debug, Deserialize)]
struct RerouteBody {
    target_user_id: String,
    target_role: String,
    remarks: Option<String>,
    photos: Option<Vec<String>>,
}

async fn reroute(
    State(service): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RerouteBody>,
) -> Result<Json<faultdesk_core::Action>, ApiError> {
    let correlation_id = correlation_from(&headers);
    let actor = actor_from(&headers, &correlation_id)?;

    let action = service
        .reroute_action(
            &ActionId(id),
            &actor,
            &body.target_user_id,
            &body.target_role,
            body.remarks,
            body.photos.unwrap_or_default(),
            &correlation_id,
        )
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(Json(action))
}

async fn delete_action(
    State(service): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_from(&headers);
    let actor = actor_from(&headers, &correlation_id)?;

    service
        .delete_action(&ActionId(id), &actor, &correlation_id)
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ActionsQuery {
    user_id: String,
    #[serde(default)]
    include_completed: bool,
}

async fn list_actions(
    State(service): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ActionsQuery>,
) -> Result<Json<Vec<faultdesk_core::Action>>, ApiError> {
    let correlation_id = correlation_from(&headers);
    let actions = service
        .list_my_actions(&query.user_id, query.include_completed)
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(Json(actions))
}

#[derive(Debug, Deserialize)]
struct ApprovalsQuery {
    user_id: String,
    role: Option<String>,
    #[serde(default)]
    pending_only: bool,
}

async fn list_approvals(
    State(service): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ApprovalsQuery>,
) -> Result<Json<Vec<faultdesk_core::Approval>>, ApiError> {
    let correlation_id = correlation_from(&headers);
    let approvals = service
        .list_my_approvals(&query.user_id, query.role.as_deref(), query.pending_only)
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(Json(approvals))
}

#[derive(Debug, Deserialize)]
struct SitesQuery {
    user_id: String,
    #[serde(default)]
    include_approved: bool,
}

async fn list_sites(
    State(service): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<SitesQuery>,
) -> Result<Json<Vec<faultdesk_core::SiteRecord>>, ApiError> {
    let correlation_id = correlation_from(&headers);
    let records = service
        .list_site_records(&query.user_id, query.include_approved)
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    file_id: String,
    row_key: String,
    observation: ObservationStatus,
    remarks: Option<String>,
}

async fn resolve_site(
    State(service): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ResolveBody>,
) -> Result<Json<faultdesk_core::SiteRecord>, ApiError> {
    let correlation_id = correlation_from(&headers);
    let actor = actor_from(&headers, &correlation_id)?;

    let record = service
        .resolve_site_observation(
            &body.file_id,
            &body.row_key,
            body.observation,
            body.remarks,
            &actor,
            &correlation_id,
        )
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct RefreshOverridesBody {
    sites: Vec<String>,
}

/// Hook for the external ingestion collaborator: replaces the override set
/// and invalidates the read-through cache.
async fn refresh_overrides(
    State(service): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RefreshOverridesBody>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_from(&headers);
    let _actor = actor_from(&headers, &correlation_id)?;

    service
        .overrides()
        .refresh(body.sites)
        .await
        .map_err(|e| map_error(e, &correlation_id))?;

    Ok(StatusCode::NO_CONTENT)
}
