use axum::{
    extract::{Path, State},
    Extension, Json,
};

use skiff_model::{TrashId, TrashItem, TrashStats, User};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

/// GET /api/trash
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<Vec<TrashItem>>>> {
    Ok(Json(ApiResponse::success(state.trash.list(&user).await?)))
}

/// GET /api/trash/stats
pub async fn stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<TrashStats>>> {
    Ok(Json(ApiResponse::success(state.trash.stats(&user).await?)))
}

/// POST /api/trash/restore/{id}
pub async fn restore(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<TrashId>,
) -> AppResult<Json<ApiResponse<String>>> {
    Ok(Json(ApiResponse::success(
        state.trash.restore(&user, id).await?,
    )))
}

/// DELETE /api/trash/{id}: permanent.
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<TrashId>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.trash.delete_item(&user, id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/trash: empty everything.
pub async fn empty(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(Json(ApiResponse::success(state.trash.empty(&user).await?)))
}
