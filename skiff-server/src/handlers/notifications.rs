use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use skiff_model::{Notification, User};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
}

/// GET /api/notifications
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Notification>>>> {
    let items = state
        .db
        .notifications
        .list_for_user(user.id, query.unread, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

/// GET /api/notifications/count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<i64>>> {
    Ok(Json(ApiResponse::success(
        state.db.notifications.unread_count(user.id).await?,
    )))
}

/// POST /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.db.notifications.mark_read(user.id, id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.db.notifications.mark_all_read(user.id).await?;
    Ok(Json(ApiResponse::success(())))
}
