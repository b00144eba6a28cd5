//! Public access surface of share links: `/s/{token}` (download),
//! `/u/{token}` (upload), `/e/{token}` (editor callback). These routes
//! bypass the ACL engine by design; the share's own gates are the policy.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use tokio_util::io::ReaderStream;

use skiff_core::quota::owner_for;
use skiff_core::uploads::AppendOutcome;
use skiff_model::{audit::event, ChangeEvent, FsOp, NewAuditEvent, ShareType};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::users::auth::middleware::{client_ip, MaybeUser};

/// Budget for the lock-guarded overwrite inside the editor callback; kept
/// under the route deadline so the lock release below always runs.
const EDIT_APPLY_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
pub struct ShareQuery {
    pub password: Option<String>,
}

fn provided_password(query: &ShareQuery, headers: &HeaderMap) -> Option<String> {
    query.password.clone().or_else(|| {
        headers
            .get("x-share-password")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// GET /s/{token}: download a shared file, or list a shared directory.
pub async fn download(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Path(token): Path<String>,
    Query(query): Query<ShareQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let password = provided_password(&query, &headers);
    let resolved = state
        .shares
        .resolve_access(&token, password.as_deref(), user.as_ref())
        .await?;

    let metadata = fs::metadata(&resolved.real)
        .await
        .map_err(|_| AppError::not_found("shared item no longer exists"))?;

    if metadata.is_dir() {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&resolved.real).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_meta = entry.metadata().await.ok();
            names.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": entry_meta.as_ref().is_some_and(|m| m.is_dir()),
                "size": entry_meta.map(|m| m.len()).unwrap_or(0),
            }));
        }
        return Ok(Json(ApiResponse::success(json!({
            "share_type": resolved.share.share_type,
            "entries": names,
        })))
        .into_response());
    }

    let filename = resolved
        .real
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = fs::File::open(&resolved.real).await?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::internal(e.to_string()))
}

/// POST /u/{token}: upload through an upload share.
pub async fn upload(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Path(token): Path<String>,
    Query(query): Query<ShareQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let password = provided_password(&query, &headers);
    let resolved = state
        .shares
        .resolve_access(&token, password.as_deref(), user.as_ref())
        .await?;
    if resolved.share.share_type != ShareType::Upload {
        return Err(AppError::forbidden("this link does not accept uploads"));
    }

    let ip = client_ip(&headers);
    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("multipart: {e}")))?
    {
        let name = field.name().map(str::to_string);
        if !matches!(name.as_deref(), Some("file") | Some("files")) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("file part without a filename"))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(format!("multipart: {e}")))?;

        // The cumulative cap is consumed atomically before any byte lands,
        // so racing uploads cannot overshoot it.
        state
            .shares
            .charge_upload(&resolved.share, data.len() as i64)
            .await?;

        let id = state
            .uploads
            .create_for_share(
                &resolved.share,
                &resolved.creator,
                &filename,
                data.len() as u64,
                ip.clone(),
            )
            .await?;
        match state.uploads.append(&resolved.creator, id, 0, &data).await {
            Ok(AppendOutcome::Completed { path, .. }) => {
                state
                    .audit
                    .record(
                        NewAuditEvent::new(event::SHARE_UPLOAD, &path)
                            .ip(ip.clone())
                            .details(json!({ "share_id": resolved.share.id, "bytes": data.len() })),
                    )
                    .await;
                uploaded.push(path);
            }
            Ok(AppendOutcome::Offset(_)) => {
                state.uploads.terminate(&resolved.creator, id).await?;
                return Err(AppError::internal("one-shot upload did not complete"));
            }
            Err(err) => {
                state.uploads.terminate(&resolved.creator, id).await?;
                return Err(err.into());
            }
        }
    }

    if uploaded.is_empty() {
        return Err(AppError::bad_request("no file parts in request"));
    }
    Ok(Json(ApiResponse::success(uploaded)))
}

/// POST /e/{token}: editor callback: atomically replaces the shared file
/// with the request body, guarded by an advisory lock for the session.
pub async fn edit_callback(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Path(token): Path<String>,
    Query(query): Query<ShareQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<()>>> {
    let password = provided_password(&query, &headers);
    let resolved = state
        .shares
        .resolve_access(&token, password.as_deref(), user.as_ref())
        .await?;
    if resolved.share.share_type != ShareType::Edit {
        return Err(AppError::forbidden("this link is not editable"));
    }

    let canonical = resolved.resolved.canonical.clone();
    let lock = state
        .locks
        .acquire_or_err(
            &canonical,
            resolved.creator.id,
            Duration::from_secs(600),
            Some("edit session".to_string()),
        )
        .await?;

    // The lock-holding section gets its own deadline, shorter than the
    // route's, so an expiry always reaches the release below instead of
    // leaking the lock until its TTL.
    let result = tokio::time::timeout(EDIT_APPLY_DEADLINE, apply_edit(&state, &resolved, &body))
        .await
        .map_err(|_| AppError::from(skiff_core::Error::DeadlineExceeded));

    let _ = state.locks.release(&lock.path, resolved.creator.id).await;
    result??;

    state
        .audit
        .record(
            NewAuditEvent::new(event::SHARE_EDIT, &canonical)
                .ip(client_ip(&headers))
                .details(json!({ "share_id": resolved.share.id, "bytes": body.len() })),
        )
        .await;
    state
        .hub
        .publish(&ChangeEvent {
            op: FsOp::Write,
            path: canonical,
            is_dir: false,
            owner: match resolved.resolved.class {
                skiff_model::StorageClass::Home => Some(resolved.creator.id),
                _ => None,
            },
            actor: Some(resolved.creator.id),
            ts: Utc::now(),
        })
        .await;
    Ok(Json(ApiResponse::success(())))
}

async fn apply_edit(
    state: &AppState,
    resolved: &skiff_core::ResolvedShare,
    body: &Bytes,
) -> AppResult<()> {
    let old_size = fs::metadata(&resolved.real)
        .await
        .map(|m| m.len() as i64)
        .unwrap_or(0);
    let new_size = body.len() as i64;

    let owner = owner_for(&resolved.resolved, &resolved.creator, &state.db.drives).await?;
    let usage = state.quota.usage(owner).await?;
    if usage.quota > 0 && usage.used - old_size + new_size > usage.quota {
        return Err(
            skiff_core::Error::QuotaExceeded("edit exceeds the owner's quota".to_string()).into(),
        );
    }

    let settings = state.settings.current().await;
    let tag_ttl = Duration::from_secs(settings.web_origin_tag_seconds.max(1) as u64);
    let staging = resolved.real.with_file_name(format!(
        ".{}.tmp-edit",
        resolved
            .real
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    state
        .web_origin
        .mark(staging.to_string_lossy().into_owned(), tag_ttl);
    fs::write(&staging, body).await?;
    state
        .web_origin
        .mark(resolved.real.to_string_lossy().into_owned(), tag_ttl);
    fs::rename(&staging, &resolved.real).await?;

    state.quota.apply_delta(owner, new_size - old_size).await?;
    Ok(())
}
