use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{Permission, PermissionGrant, PolicyEvaluator, ResourceContext};
use crate::errors::AppResult;
use crate::jwt::AuthUser;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CanRequest {
    pub permission: Permission,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub province_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CanResponse {
    pub allowed: bool,
}

#[utoipa::path(
    post,
    path = "/authz/can",
    tag = "Authorization",
    request_body = CanRequest,
    responses((status = 200, description = "Permission check for the caller", body = CanResponse))
)]
pub async fn can(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CanRequest>,
) -> AppResult<Json<CanResponse>> {
    let ctx = ResourceContext {
        branch_id: payload.branch_id,
        province_id: payload.province_id,
    };
    let allowed = state.resolver.can(&auth.user, payload.permission, &ctx);
    Ok(Json(CanResponse { allowed }))
}

#[utoipa::path(
    get,
    path = "/scope",
    tag = "Authorization",
    responses((status = 200, description = "Resolved permissions and geographic scope", body = PermissionGrant))
)]
pub async fn scope(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<PermissionGrant>> {
    Ok(Json(state.resolver.grant(&auth.user)))
}
