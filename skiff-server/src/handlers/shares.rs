//! Share-link management for authenticated users (the public access side
//! lives in `share_access`).

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use skiff_core::auth::password;
use skiff_core::NewShare;
use skiff_model::{ShareId, ShareToken, User};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

/// GET /api/shares
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<Vec<ShareToken>>>> {
    Ok(Json(ApiResponse::success(
        state.shares.list_mine(user.id).await?,
    )))
}

/// POST /api/shares
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<NewShare>,
) -> AppResult<Json<ApiResponse<ShareToken>>> {
    Ok(Json(ApiResponse::success(
        state.shares.create(&user, request).await?,
    )))
}

#[derive(Debug, Deserialize)]
pub struct UpdateShare {
    pub expires_at: Option<DateTime<Utc>>,
    /// Empty string clears the password; `None` leaves it alone.
    pub password: Option<String>,
    pub max_access: Option<i64>,
    pub is_active: Option<bool>,
    pub require_login: Option<bool>,
    pub max_file_size: Option<i64>,
    pub allowed_extensions: Option<Vec<String>>,
    pub max_total_size: Option<i64>,
}

/// PUT /api/shares/{id}
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<ShareId>,
    Json(request): Json<UpdateShare>,
) -> AppResult<Json<ApiResponse<ShareToken>>> {
    let mut share = state.shares.get_owned(&user, id).await?;

    if let Some(expires_at) = request.expires_at {
        share.expires_at = Some(expires_at);
        share.expiration_notified = false;
    }
    if let Some(password) = request.password {
        share.password_hash = if password.is_empty() {
            None
        } else {
            Some(password::hash_password(&password)?)
        };
    }
    if let Some(max_access) = request.max_access {
        share.max_access = max_access.max(0);
    }
    if let Some(is_active) = request.is_active {
        share.is_active = is_active;
    }
    if let Some(require_login) = request.require_login {
        share.require_login = require_login;
    }
    if let Some(max_file_size) = request.max_file_size {
        share.max_file_size = max_file_size.max(0);
    }
    if let Some(extensions) = request.allowed_extensions {
        share.allowed_extensions = if extensions.is_empty() {
            None
        } else {
            Some(extensions)
        };
    }
    if let Some(max_total_size) = request.max_total_size {
        share.max_total_size = max_total_size.max(0);
    }

    state.shares.update(&user, share.clone()).await?;
    Ok(Json(ApiResponse::success(share)))
}

/// POST /api/shares/{id}/revoke
pub async fn revoke(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<ShareId>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.shares.revoke(&user, id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/shares/{id}
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<ShareId>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.shares.delete(&user, id).await?;
    Ok(Json(ApiResponse::success(())))
}
