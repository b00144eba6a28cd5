use std::time::Duration as StdDuration;

use axum::{extract::State, http::HeaderMap, Extension, Json};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use skiff_core::auth::{password, totp};
use skiff_model::{audit::event, LoginRequest, NewAuditEvent, TotpLoginRequest, User};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::users::auth::middleware::client_ip;

/// How long a passed password step stays valid for the 2FA step.
const PENDING_2FA_TTL: StdDuration = StdDuration::from_secs(300);

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    TwoFactor {
        requires_2fa: bool,
        user_id: skiff_model::UserId,
    },
    Authenticated {
        token: String,
        user: User,
    },
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let ip = client_ip(&headers);
    state.guard.preflight(ip.as_deref()).await?;

    let user = state.db.users.get_by_username(&request.username).await?;

    // Password verification always runs, against a throwaway hash when the
    // account is unknown, so timing does not reveal which usernames exist.
    let verified = match &user {
        Some(user) => match state.db.users.get_password_hash(user.id).await? {
            Some(hash) => password::verify_password(&request.password, &hash),
            None => password::verify_against_dummy(&request.password),
        },
        None => password::verify_against_dummy(&request.password),
    };

    let Some(user) = user else {
        state.guard.on_failure(None, ip.as_deref()).await?;
        return Err(AppError::unauthorized("invalid credentials"));
    };

    // A locked or deactivated account denies regardless of correctness.
    if state.guard.account_locked(&user).await {
        state
            .audit
            .record(
                NewAuditEvent::new(event::USER_LOGIN_FAILED, &user.username)
                    .ip(ip.clone())
                    .details(json!({ "reason": "account-locked" })),
            )
            .await;
        return Err(skiff_core::Error::AccountLocked.into());
    }
    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }

    if !verified {
        state.guard.on_failure(Some(&user), ip.as_deref()).await?;
        state
            .audit
            .record(
                NewAuditEvent::new(event::USER_LOGIN_FAILED, &user.username).ip(ip.clone()),
            )
            .await;
        return Err(AppError::unauthorized("invalid credentials"));
    }

    if user.totp_enabled {
        state.pending_2fa.mark(user.id.to_string(), PENDING_2FA_TTL);
        return Ok(Json(ApiResponse::success(LoginResponse::TwoFactor {
            requires_2fa: true,
            user_id: user.id,
        })));
    }

    finish_login(&state, user, request.remember_me, ip).await
}

pub async fn login_totp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TotpLoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let ip = client_ip(&headers);
    state.guard.preflight(ip.as_deref()).await?;

    // Only accounts that just passed the password step may attempt codes.
    if !state.pending_2fa.is_marked(&request.user_id.to_string()) {
        return Err(AppError::unauthorized("password step required"));
    }
    let user = state
        .db
        .users
        .get_by_id(request.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("password step required"))?;
    if !user.totp_enabled {
        return Err(AppError::unauthorized("two-factor not configured"));
    }

    let secret = state
        .db
        .users
        .get_totp_secret(user.id)
        .await?
        .ok_or_else(|| AppError::unauthorized("two-factor not configured"))?;
    let now = Utc::now().timestamp() as u64;
    if !totp::verify(&secret, request.code.trim(), now) {
        state.guard.on_failure(Some(&user), ip.as_deref()).await?;
        return Err(AppError::unauthorized("invalid code"));
    }

    finish_login(&state, user, false, ip).await
}

async fn finish_login(
    state: &AppState,
    user: User,
    remember_me: bool,
    ip: Option<String>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    state.guard.on_success(&user).await?;

    let settings = state.settings.current().await;
    let lifetime = if remember_me {
        Duration::days(30)
    } else {
        Duration::hours(settings.session_timeout_hours.max(1))
    };
    let token = state.jwt.mint(user.id, lifetime)?;

    state
        .audit
        .record(
            NewAuditEvent::new(event::USER_LOGIN, &user.username)
                .actor(user.id)
                .ip(ip),
        )
        .await;

    Ok(Json(ApiResponse::success(LoginResponse::Authenticated {
        token,
        user,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .audit
        .record(NewAuditEvent::new(event::USER_LOGOUT, &user.username).actor(user.id))
        .await;
    Ok(Json(ApiResponse::success(())))
}

pub async fn me(Extension(user): Extension<User>) -> AppResult<Json<ApiResponse<User>>> {
    Ok(Json(ApiResponse::success(user)))
}

#[derive(Debug, Serialize)]
pub struct TotpSetup {
    pub secret: String,
}

/// Generates and stores a fresh secret, disabled until confirmed.
pub async fn totp_setup(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<TotpSetup>>> {
    let secret = totp::generate_secret();
    state
        .db
        .users
        .set_totp(user.id, Some(&secret), false)
        .await?;
    Ok(Json(ApiResponse::success(TotpSetup { secret })))
}

#[derive(Debug, Deserialize)]
pub struct TotpConfirm {
    pub code: String,
}

/// Enables 2FA once the user proves they hold the secret.
pub async fn totp_enable(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<TotpConfirm>,
) -> AppResult<Json<ApiResponse<()>>> {
    // The secret was stored disabled by setup; read it back.
    let secret = state
        .db
        .users
        .get_totp_secret(user.id)
        .await?
        .ok_or_else(|| AppError::bad_request("run setup first"))?;
    let now = Utc::now().timestamp() as u64;
    if !totp::verify(&secret, request.code.trim(), now) {
        return Err(AppError::unauthorized("invalid code"));
    }
    state
        .db
        .users
        .set_totp(user.id, Some(&secret), true)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn totp_disable(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.db.users.set_totp(user.id, None, false).await?;
    Ok(Json(ApiResponse::success(())))
}
