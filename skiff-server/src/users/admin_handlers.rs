//! Admin surface: account management, system settings, audit queries.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use skiff_core::auth::password;
use skiff_model::{
    audit::event, user::validate_username, AuditEvent, AuditQuery, NewAuditEvent, NewUser,
    SettingRow, User, UserId,
};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

pub async fn list_users(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    Ok(Json(ApiResponse::success(state.db.users.list().await?)))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Json(request): Json<NewUser>,
) -> AppResult<Json<ApiResponse<User>>> {
    validate_username(&request.username)?;
    let settings = state.settings.current().await;
    let now = Utc::now();
    let user = User {
        id: UserId::new(),
        username: request.username.clone(),
        email: request.email.clone(),
        is_admin: request.is_admin,
        is_active: true,
        storage_quota: request
            .storage_quota
            .unwrap_or(settings.default_storage_quota),
        storage_used: 0,
        trash_used: 0,
        totp_enabled: false,
        failed_login_count: 0,
        locked_until: None,
        created_at: now,
        updated_at: now,
    };
    let password_hash = request
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(password::hash_password)
        .transpose()?;

    state
        .db
        .users
        .create(&user, password_hash.as_deref())
        .await?;
    tokio::fs::create_dir_all(state.resolver.home_dir(&user.username)).await
        .map_err(|e| AppError::internal(format!("failed to create home directory: {e}")))?;

    state
        .audit
        .record(
            NewAuditEvent::new(event::USER_CREATED, &user.username)
                .actor(admin.id)
                .details(json!({ "is_admin": user.is_admin })),
        )
        .await;
    Ok(Json(ApiResponse::success(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub storage_quota: Option<i64>,
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(request): Json<UpdateUser>,
) -> AppResult<Json<ApiResponse<User>>> {
    let mut user = state
        .db
        .users
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;

    if let Some(email) = request.email {
        user.email = if email.is_empty() { None } else { Some(email) };
    }
    if let Some(is_admin) = request.is_admin {
        user.is_admin = is_admin;
    }
    if let Some(is_active) = request.is_active {
        user.is_active = is_active;
    }
    if let Some(quota) = request.storage_quota {
        user.storage_quota = quota.max(0);
    }
    state.db.users.update_profile(&user).await?;
    // Admin-flag and activation changes affect cached permissions.
    state.acl.invalidate_user(user.id);
    Ok(Json(ApiResponse::success(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path(id): Path<UserId>,
) -> AppResult<Json<ApiResponse<()>>> {
    if id == admin.id {
        return Err(AppError::bad_request("cannot delete your own account"));
    }
    let user = state
        .db
        .users
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    state.db.users.delete(id).await?;
    state.acl.invalidate_user(id);
    state
        .audit
        .record(NewAuditEvent::new(event::USER_DELETED, &user.username).actor(admin.id))
        .await;
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct SetPassword {
    pub password: String,
}

pub async fn set_user_password(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(request): Json<SetPassword>,
) -> AppResult<Json<ApiResponse<()>>> {
    if request.password.len() < 8 {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    let hash = password::hash_password(&request.password)?;
    state.db.users.set_password_hash(id, &hash).await?;
    Ok(Json(ApiResponse::success(())))
}

/// Separate credential for the SMB service; provisioning of the SMB
/// account itself happens outside this server.
pub async fn set_user_smb_password(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(request): Json<SetPassword>,
) -> AppResult<Json<ApiResponse<()>>> {
    let hash = password::hash_password(&request.password)?;
    state.db.users.set_smb_password_hash(id, &hash).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn unlock_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Path(id): Path<UserId>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.guard.force_unlock(id, admin.id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn get_settings(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<SettingRow>>>> {
    Ok(Json(ApiResponse::success(state.settings.rows().await?)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettings {
    pub values: std::collections::HashMap<String, String>,
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Json(request): Json<UpdateSettings>,
) -> AppResult<Json<ApiResponse<skiff_model::Settings>>> {
    let mut latest = state.settings.current().await;
    for (key, value) in &request.values {
        latest = state.settings.update(key, value, Some(admin.id)).await?;
    }
    state
        .audit
        .record(
            NewAuditEvent::new(event::ADMIN_SETTINGS_UPDATED, "system_settings")
                .actor(admin.id)
                .details(json!({ "keys": request.values.keys().collect::<Vec<_>>() })),
        )
        .await;
    Ok(Json(ApiResponse::success(latest)))
}

pub async fn query_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<ApiResponse<Vec<AuditEvent>>>> {
    Ok(Json(ApiResponse::success(state.audit.query(query).await?)))
}

/// On-demand SMB log ingestion, alongside the 30 s background cadence.
pub async fn flush_smb_log(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(Json(ApiResponse::success(state.correlator.sync().await?)))
}
