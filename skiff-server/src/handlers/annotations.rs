//! Per-user annotations (description, tags) and stars on paths.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;

use skiff_model::{FileAnnotation, User};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

fn canonicalize(state: &AppState, user: &User, path: &str) -> AppResult<String> {
    Ok(state.resolver.resolve(path, Some(user))?.canonical)
}

/// GET /api/meta/{*path}
pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<Option<FileAnnotation>>>> {
    let canonical = canonicalize(&state, &user, &path)?;
    Ok(Json(ApiResponse::success(
        state.db.annotations.get(user.id, &canonical).await?,
    )))
}

#[derive(Debug, Deserialize)]
pub struct SetAnnotation {
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// PUT /api/meta/{*path}
pub async fn set(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Json(request): Json<SetAnnotation>,
) -> AppResult<Json<ApiResponse<FileAnnotation>>> {
    let canonical = canonicalize(&state, &user, &path)?;
    let annotation = FileAnnotation {
        owner_id: user.id,
        path: canonical,
        description: request.description.filter(|d| !d.is_empty()),
        tags: FileAnnotation::normalized_tags(request.tags),
    };
    state.db.annotations.upsert(&annotation).await?;
    Ok(Json(ApiResponse::success(annotation)))
}

/// DELETE /api/meta/{*path}
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    let canonical = canonicalize(&state, &user, &path)?;
    state.db.annotations.delete(user.id, &canonical).await?;
    Ok(Json(ApiResponse::success(())))
}

/// GET /api/starred
pub async fn list_starred(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    Ok(Json(ApiResponse::success(
        state.db.annotations.list_starred(user.id).await?,
    )))
}

/// PUT /api/starred/{*path}
pub async fn star(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    let canonical = canonicalize(&state, &user, &path)?;
    state.db.annotations.star(user.id, &canonical).await?;
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/starred/{*path}
pub async fn unstar(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    let canonical = canonicalize(&state, &user, &path)?;
    state.db.annotations.unstar(user.id, &canonical).await?;
    Ok(Json(ApiResponse::success(())))
}
