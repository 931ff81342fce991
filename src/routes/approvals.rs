use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::workflow::{ApprovalRequest, ApprovalStatus, AuditEntry, Decision, NewApproval};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// pending, approved, rejected or cancelled (default pending)
    pub status: Option<ApprovalStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailResponse {
    pub request_id: String,
    pub chain_valid: bool,
    pub entries: Vec<AuditEntry>,
}

#[utoipa::path(
    post,
    path = "/approvals",
    tag = "Approvals",
    request_body = NewApproval,
    responses(
        (status = 201, description = "Approval request created", body = ApprovalRequest),
        (status = 400, description = "Malformed approval chain"),
        (status = 403, description = "Caller cannot submit for the branch"),
        (status = 409, description = "Document already has a pending request")
    )
)]
pub async fn create_approval(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NewApproval>,
) -> AppResult<(StatusCode, Json<ApprovalRequest>)> {
    let request = state.workflow.create(payload, &auth.user).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[utoipa::path(
    get,
    path = "/approvals",
    tag = "Approvals",
    params(ListParams),
    responses((status = 200, description = "Requests visible to the caller, newest first", body = [ApprovalRequest]))
)]
pub async fn list_approvals(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<ApprovalRequest>>> {
    let status = params.status.unwrap_or(ApprovalStatus::Pending);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    Ok(Json(state.workflow.list_visible(status, &auth.user, limit).await?))
}

#[utoipa::path(
    get,
    path = "/approvals/assigned",
    tag = "Approvals",
    responses((status = 200, description = "Pending requests waiting on the caller's role", body = [ApprovalRequest]))
)]
pub async fn list_assigned(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<ApprovalRequest>>> {
    Ok(Json(state.workflow.list_assigned(&auth.user).await?))
}

#[utoipa::path(
    get,
    path = "/approvals/{id}",
    tag = "Approvals",
    params(("id" = String, Path, description = "Approval request id")),
    responses((status = 200, description = "Approval request", body = ApprovalRequest))
)]
pub async fn get_approval(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApprovalRequest>> {
    Ok(Json(state.workflow.view(&id, &auth.user).await?))
}

#[utoipa::path(
    get,
    path = "/approvals/{id}/audit",
    tag = "Approvals",
    params(("id" = String, Path, description = "Approval request id")),
    responses((status = 200, description = "Audit trail in commit order", body = AuditTrailResponse))
)]
pub async fn get_audit_trail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<AuditTrailResponse>> {
    state.workflow.view(&id, &auth.user).await?;

    let entries = state.workflow.audit_trail(&id).await?;
    let chain_valid = state.workflow.verify_audit_chain(&id).await?;

    Ok(Json(AuditTrailResponse {
        request_id: id,
        chain_valid,
        entries,
    }))
}

#[utoipa::path(
    post,
    path = "/approvals/{id}/decision",
    tag = "Approvals",
    params(("id" = String, Path, description = "Approval request id")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Decision recorded", body = ApprovalRequest),
        (status = 403, description = "Caller cannot act on the current step"),
        (status = 409, description = "This request was already decided, please refresh")
    )
)]
pub async fn decide(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> AppResult<Json<ApprovalRequest>> {
    let request = state
        .workflow
        .decide(&id, &auth.user, payload.decision, payload.comment)
        .await?;
    Ok(Json(request))
}

#[utoipa::path(
    post,
    path = "/approvals/{id}/cancel",
    tag = "Approvals",
    params(("id" = String, Path, description = "Approval request id")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Request cancelled", body = ApprovalRequest),
        (status = 403, description = "Caller cannot cancel this request"),
        (status = 409, description = "This request was already decided, please refresh")
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    payload: Option<Json<CancelRequest>>,
) -> AppResult<Json<ApprovalRequest>> {
    let comment = payload.and_then(|Json(body)| body.comment);
    let request = state.workflow.cancel(&id, &auth.user, comment).await?;
    Ok(Json(request))
}
