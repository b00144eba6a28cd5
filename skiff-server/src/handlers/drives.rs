//! Shared-drive management. Creation and membership are admin operations;
//! every membership change invalidates the affected user's permission
//! cache so the new level applies on the next request.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use skiff_core::paths::validate_name;
use skiff_model::{
    audit::event, AccessLevel, DriveId, DriveMembership, NewAuditEvent, SharedDrive, User,
    UserId,
};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// GET /api/drives: drives visible to the caller.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<Vec<SharedDrive>>>> {
    Ok(Json(ApiResponse::success(
        state.acl.visible_drives(Some(&user)).await?,
    )))
}

#[derive(Debug, Deserialize)]
pub struct CreateDrive {
    pub name: String,
    #[serde(default)]
    pub storage_quota: i64,
}

/// POST /api/admin/drives
pub async fn create(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Json(request): Json<CreateDrive>,
) -> AppResult<Json<ApiResponse<SharedDrive>>> {
    validate_name(&request.name)?;
    let drive = SharedDrive {
        id: DriveId::new(),
        name: request.name,
        storage_quota: request.storage_quota.max(0),
        storage_used: 0,
        is_active: true,
        created_by: admin.id,
        created_at: Utc::now(),
    };
    state.db.drives.create(&drive).await?;
    tokio::fs::create_dir_all(state.resolver.drive_dir(&drive.name))
        .await
        .map_err(|e| AppError::internal(format!("failed to create drive directory: {e}")))?;

    state
        .audit
        .record(
            NewAuditEvent::new(event::ADMIN_DRIVE_CREATED, format!("/shared/{}", drive.name))
                .actor(admin.id),
        )
        .await;
    Ok(Json(ApiResponse::success(drive)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDrive {
    pub storage_quota: Option<i64>,
    pub is_active: Option<bool>,
}

/// PUT /api/admin/drives/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<DriveId>,
    Json(request): Json<UpdateDrive>,
) -> AppResult<Json<ApiResponse<SharedDrive>>> {
    let mut drive = state
        .db
        .drives
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("drive"))?;
    if let Some(quota) = request.storage_quota {
        drive.storage_quota = quota.max(0);
    }
    if let Some(is_active) = request.is_active {
        drive.is_active = is_active;
    }
    state.db.drives.update(&drive).await?;
    state.acl.invalidate_all();
    Ok(Json(ApiResponse::success(drive)))
}

/// DELETE /api/admin/drives/{id}: removes the drive record and
/// memberships; the subtree stays on disk for the operator to archive.
pub async fn delete(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path(id): Path<DriveId>,
) -> AppResult<Json<ApiResponse<()>>> {
    let drive = state
        .db
        .drives
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("drive"))?;
    state.db.drives.delete(id).await?;
    state.acl.invalidate_all();
    state
        .audit
        .record(
            NewAuditEvent::new(event::ADMIN_DRIVE_DELETED, format!("/shared/{}", drive.name))
                .actor(admin.id),
        )
        .await;
    Ok(Json(ApiResponse::success(())))
}

/// GET /api/admin/drives/{id}/members
pub async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<DriveId>,
) -> AppResult<Json<ApiResponse<Vec<DriveMembership>>>> {
    Ok(Json(ApiResponse::success(
        state.db.drives.list_members(id).await?,
    )))
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub user_id: UserId,
    pub level: AccessLevel,
}

/// POST /api/admin/drives/{id}/members: add or change a membership.
pub async fn add_member(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path(id): Path<DriveId>,
    Json(request): Json<MemberRequest>,
) -> AppResult<Json<ApiResponse<DriveMembership>>> {
    if request.level == AccessLevel::None {
        return Err(AppError::bad_request("level must be read or read_write"));
    }
    let drive = state
        .db
        .drives
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("drive"))?;
    state
        .db
        .users
        .get_by_id(request.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;

    let membership = DriveMembership {
        drive_id: id,
        user_id: request.user_id,
        level: request.level,
    };
    state.db.drives.add_member(&membership).await?;
    state.acl.invalidate_user(request.user_id);

    state
        .audit
        .record(
            NewAuditEvent::new(
                event::ADMIN_MEMBERSHIP_CHANGED,
                format!("/shared/{}", drive.name),
            )
            .actor(admin.id)
            .details(json!({
                "user_id": request.user_id,
                "level": request.level,
            })),
        )
        .await;
    Ok(Json(ApiResponse::success(membership)))
}

/// DELETE /api/admin/drives/{id}/members/{user_id}
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path((id, user_id)): Path<(DriveId, UserId)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let drive = state
        .db
        .drives
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("drive"))?;
    state.db.drives.remove_member(id, user_id).await?;
    state.acl.invalidate_user(user_id);

    state
        .audit
        .record(
            NewAuditEvent::new(
                event::ADMIN_MEMBERSHIP_CHANGED,
                format!("/shared/{}", drive.name),
            )
            .actor(admin.id)
            .details(json!({ "user_id": user_id, "removed": true })),
        )
        .await;
    Ok(Json(ApiResponse::success(())))
}
