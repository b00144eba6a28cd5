//! Direct user-to-user sharing of items, with a notification to the
//! recipient.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use skiff_core::acl::AccessIntent;
use skiff_model::{
    AccessLevel, FileShare, FileShareId, NewNotification, User,
};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct CreateFileShare {
    pub username: String,
    pub path: String,
    pub level: AccessLevel,
    pub message: Option<String>,
}

/// POST /api/file-shares
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateFileShare>,
) -> AppResult<Json<ApiResponse<FileShare>>> {
    if request.level == AccessLevel::None {
        return Err(AppError::bad_request("level must be read or read_write"));
    }
    let recipient = state
        .db
        .users
        .get_by_username(&request.username)
        .await?
        .ok_or_else(|| AppError::not_found("recipient"))?;
    if recipient.id == user.id {
        return Err(AppError::bad_request("cannot share with yourself"));
    }

    // The path must exist in the owner's view, and the owner must be able
    // to read it.
    let resolved = state.resolver.resolve(&request.path, Some(&user))?;
    state
        .acl
        .require(Some(&user), &resolved, AccessIntent::Read)
        .await?;
    let metadata = tokio::fs::metadata(&resolved.real)
        .await
        .map_err(|_| AppError::not_found(resolved.canonical.clone()))?;

    let now = Utc::now();
    let share = FileShare {
        id: FileShareId::new(),
        owner_id: user.id,
        shared_with_id: recipient.id,
        item_path: resolved.canonical.clone(),
        item_name: resolved
            .real
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        is_folder: metadata.is_dir(),
        level: request.level,
        message: request.message.clone(),
        created_at: now,
        updated_at: now,
    };
    state.db.file_shares.upsert(&share).await?;

    state
        .db
        .notifications
        .insert(
            &NewNotification::new(
                recipient.id,
                "file_shared",
                format!("{} shared {} with you", user.username, share.item_name),
            )
            .message(request.message.unwrap_or_default()),
        )
        .await?;

    Ok(Json(ApiResponse::success(share)))
}

/// GET /api/file-shares: shares the caller has given out.
pub async fn list_owned(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<Vec<FileShare>>>> {
    Ok(Json(ApiResponse::success(
        state.db.file_shares.list_owned(user.id).await?,
    )))
}

/// GET /api/file-shares/received: shares given to the caller.
pub async fn list_received(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<Vec<FileShare>>>> {
    Ok(Json(ApiResponse::success(
        state.db.file_shares.list_received(user.id).await?,
    )))
}

/// DELETE /api/file-shares/{id}: either side may end the share.
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<FileShareId>,
) -> AppResult<Json<ApiResponse<()>>> {
    let share = state
        .db
        .file_shares
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("file share"))?;
    if share.owner_id != user.id && share.shared_with_id != user.id && !user.is_admin {
        return Err(AppError::forbidden("not a party to this share"));
    }
    state.db.file_shares.delete(id).await?;
    Ok(Json(ApiResponse::success(())))
}
