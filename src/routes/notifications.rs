use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::notifications::Notification;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationList {
    pub unread: usize,
    pub items: Vec<Notification>,
}

#[utoipa::path(
    get,
    path = "/notifications",
    tag = "Notifications",
    params(NotificationParams),
    responses((status = 200, description = "Caller's notifications, newest first", body = NotificationList))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<NotificationParams>,
) -> AppResult<Json<NotificationList>> {
    let limit = params.limit.unwrap_or(50).min(200);
    let items = state.notifications.list_for_user(&auth.user.id, limit).await?;
    let unread = state.notifications.unread_count(&auth.user.id).await?;
    Ok(Json(NotificationList { unread, items }))
}

#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    tag = "Notifications",
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification marked read", body = Notification),
        (status = 403, description = "Not the recipient")
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Notification>> {
    Ok(Json(state.notifications.mark_read(&auth.user, &id).await?))
}
