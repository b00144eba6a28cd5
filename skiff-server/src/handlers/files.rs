//! Directory listing and direct file operations on the virtual tree.

use std::path::Path as FsPath;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use tokio_util::io::ReaderStream;

use skiff_core::acl::AccessIntent;
use skiff_core::paths::{validate_name, Resolved};
use skiff_core::quota::{owner_for, tree_size};
use skiff_model::{
    audit::event, ChangeEvent, DirListing, FileEntry, FsOp, NewAuditEvent, SortKey, SortOrder,
    StorageClass, UsageReport, User,
};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::users::auth::middleware::MaybeUser;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: String,
    pub sort: Option<String>,
    pub order: Option<String>,
}

/// GET /api/files?path=: list a directory. Unauthenticated callers see
/// only the public index.
pub async fn list(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<DirListing>>> {
    let resolved = state.resolver.resolve(&query.path, user.as_ref())?;

    let sort = SortKey::parse(query.sort.as_deref().unwrap_or("name"));
    let order = SortOrder::parse(query.order.as_deref().unwrap_or("asc"));

    let mut listing = if resolved.is_root() {
        index_listing(&state, user.as_ref(), &resolved).await?
    } else {
        state
            .acl
            .require(user.as_ref(), &resolved, AccessIntent::Read)
            .await?;
        directory_listing(&resolved).await?
    };
    skiff_model::files::sort_entries(&mut listing.files, sort, order);
    listing.total = listing.files.len();
    Ok(Json(ApiResponse::success(listing)))
}

/// The synthetic levels of the tree: `/` and `/shared`.
async fn index_listing(
    state: &AppState,
    user: Option<&User>,
    resolved: &Resolved,
) -> AppResult<DirListing> {
    let mut files = Vec::new();
    if resolved.canonical == "/" {
        if user.is_some() {
            files.push(FileEntry {
                name: "home".to_string(),
                path: "/home".to_string(),
                is_dir: true,
                size: 0,
                modified: None,
            });
        }
        files.push(FileEntry {
            name: "shared".to_string(),
            path: "/shared".to_string(),
            is_dir: true,
            size: 0,
            modified: None,
        });
    } else {
        for drive in state.acl.visible_drives(user).await? {
            files.push(FileEntry {
                name: drive.name.clone(),
                path: format!("/shared/{}", drive.name),
                is_dir: true,
                size: drive.storage_used,
                modified: Some(drive.created_at),
            });
        }
    }
    Ok(DirListing {
        path: resolved.canonical.clone(),
        storage_type: StorageClass::Root,
        total: files.len(),
        total_size: 0,
        files,
    })
}

async fn directory_listing(resolved: &Resolved) -> AppResult<DirListing> {
    let metadata = fs::metadata(&resolved.real)
        .await
        .map_err(|_| AppError::not_found(resolved.canonical.clone()))?;
    if !metadata.is_dir() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid-path",
            format!("{} is not a directory", resolved.canonical),
        ));
    }

    let mut files = Vec::new();
    let mut total_size = 0i64;
    let mut entries = fs::read_dir(&resolved.real).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let size = if metadata.is_dir() {
            0
        } else {
            metadata.len() as i64
        };
        total_size += size;
        files.push(FileEntry {
            name: name.clone(),
            path: format!("{}/{}", resolved.canonical.trim_end_matches('/'), name),
            is_dir: metadata.is_dir(),
            size,
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    Ok(DirListing {
        path: resolved.canonical.clone(),
        storage_type: resolved.class,
        total: files.len(),
        total_size,
        files,
    })
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub download: bool,
}

/// GET /api/files/{*path}: stream one file.
pub async fn download(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let resolved = state.resolver.resolve(&path, Some(&user))?;
    state
        .acl
        .require(Some(&user), &resolved, AccessIntent::Read)
        .await?;

    let metadata = fs::metadata(&resolved.real)
        .await
        .map_err(|_| AppError::not_found(resolved.canonical.clone()))?;
    if metadata.is_dir() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid-path",
            "directories are listed, not downloaded",
        ));
    }

    let file = fs::File::open(&resolved.real).await?;
    let stream = ReaderStream::new(file);

    state
        .audit
        .record(
            NewAuditEvent::new(event::FILE_DOWNLOAD, &resolved.canonical)
                .actor(user.id)
                .ip(crate::users::auth::middleware::client_ip(&headers)),
        )
        .await;

    let mut response = Response::builder()
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_TYPE, "application/octet-stream");
    if query.download {
        let filename = resolved
            .real
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        response = response.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        );
    }
    response
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::internal(e.to_string()))
}

/// PUT /api/files/{*path}: overwrite with the request body (text editing
/// from the browser).
pub async fn overwrite(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    body: axum::body::Bytes,
) -> AppResult<Json<ApiResponse<FileEntry>>> {
    let resolved = state.resolver.resolve(&path, Some(&user))?;
    state
        .acl
        .require(Some(&user), &resolved, AccessIntent::Write)
        .await?;
    require_unlocked(&state, &resolved.canonical, &user).await?;

    let old_size = fs::metadata(&resolved.real)
        .await
        .map(|m| m.len() as i64)
        .unwrap_or(0);
    let new_size = body.len() as i64;

    let owner = owner_for(&resolved, &user, &state.db.drives).await?;
    let usage = state.quota.usage(owner).await?;
    if usage.quota > 0 && usage.used - old_size + new_size > usage.quota {
        return Err(skiff_core::Error::QuotaExceeded(format!(
            "write of {new_size} bytes exceeds quota"
        ))
        .into());
    }

    if let Some(parent) = resolved.real.parent() {
        fs::create_dir_all(parent).await?;
    }
    // Write-then-rename keeps readers off half-written content. The
    // staging name is tagged too so the watcher ignores its brief life.
    let staging = resolved
        .real
        .with_file_name(format!(".{}.tmp-write", file_name(&resolved.real)));
    mark_web_origin_path(&state, &staging).await;
    fs::write(&staging, &body).await?;
    mark_web_origin(&state, &resolved).await;
    fs::rename(&staging, &resolved.real).await?;

    state.quota.apply_delta(owner, new_size - old_size).await?;
    state
        .audit
        .record(
            NewAuditEvent::new(event::FILE_WRITE, &resolved.canonical)
                .actor(user.id)
                .details(json!({ "bytes": new_size })),
        )
        .await;
    publish(&state, FsOp::Write, &resolved, &user, false).await;

    Ok(Json(ApiResponse::success(FileEntry {
        name: file_name(&resolved.real),
        path: resolved.canonical.clone(),
        is_dir: false,
        size: new_size,
        modified: Some(Utc::now()),
    })))
}

/// DELETE /api/files/{*path}: moves the entry to the caller's trash.
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<skiff_model::TrashItem>>> {
    let resolved = state.resolver.resolve(&path, Some(&user))?;
    require_unlocked(&state, &resolved.canonical, &user).await?;
    mark_web_origin(&state, &resolved).await;
    let item = state.trash.move_to_trash(&user, &path).await?;
    Ok(Json(ApiResponse::success(item)))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
}

/// PUT /api/files/rename/{*path}
pub async fn rename(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Json(request): Json<RenameRequest>,
) -> AppResult<Json<ApiResponse<FileEntry>>> {
    validate_name(&request.new_name)?;
    let source = state.resolver.resolve(&path, Some(&user))?;
    if source.is_class_root() {
        return Err(
            skiff_core::Error::InvalidPath(format!("cannot rename {}", source.canonical)).into(),
        );
    }
    state
        .acl
        .require(Some(&user), &source, AccessIntent::Write)
        .await?;
    require_unlocked(&state, &source.canonical, &user).await?;

    let parent = source
        .canonical
        .rsplit_once('/')
        .map(|(p, _)| p)
        .unwrap_or_default();
    let dest_virtual = format!("{parent}/{}", request.new_name);
    let dest = state.resolver.resolve(&dest_virtual, Some(&user))?;
    if fs::symlink_metadata(&dest.real).await.is_ok() {
        return Err(skiff_core::Error::AlreadyExists(dest.canonical.clone()).into());
    }

    let metadata = fs::symlink_metadata(&source.real)
        .await
        .map_err(|_| AppError::not_found(source.canonical.clone()))?;
    mark_web_origin(&state, &source).await;
    mark_web_origin(&state, &dest).await;
    fs::rename(&source.real, &dest.real).await?;

    state
        .audit
        .record(
            NewAuditEvent::new(event::FILE_RENAME, &source.canonical)
                .actor(user.id)
                .details(json!({ "to": dest.canonical })),
        )
        .await;
    publish(&state, FsOp::Remove, &source, &user, metadata.is_dir()).await;
    publish(&state, FsOp::Rename, &dest, &user, metadata.is_dir()).await;

    Ok(Json(ApiResponse::success(FileEntry {
        name: request.new_name,
        path: dest.canonical.clone(),
        is_dir: metadata.is_dir(),
        size: metadata.len() as i64,
        modified: Some(Utc::now()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct DestinationRequest {
    pub destination: String,
}

/// PUT /api/files/move/{*path}: move, possibly across storage classes
/// when the caller may write both sides.
pub async fn relocate(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Json(request): Json<DestinationRequest>,
) -> AppResult<Json<ApiResponse<FileEntry>>> {
    let source = state.resolver.resolve(&path, Some(&user))?;
    if source.is_class_root() {
        return Err(
            skiff_core::Error::InvalidPath(format!("cannot move {}", source.canonical)).into(),
        );
    }
    let dest = state.resolver.resolve(&request.destination, Some(&user))?;
    state
        .acl
        .require(Some(&user), &source, AccessIntent::Write)
        .await?;
    state
        .acl
        .require(Some(&user), &dest, AccessIntent::Write)
        .await?;
    require_unlocked(&state, &source.canonical, &user).await?;

    let metadata = fs::symlink_metadata(&source.real)
        .await
        .map_err(|_| AppError::not_found(source.canonical.clone()))?;

    // Moving into a directory keeps the source name.
    let dest = if fs::metadata(&dest.real).await.is_ok_and(|m| m.is_dir()) {
        let target = format!(
            "{}/{}",
            dest.canonical.trim_end_matches('/'),
            file_name(&source.real)
        );
        state.resolver.resolve(&target, Some(&user))?
    } else {
        dest
    };
    if fs::symlink_metadata(&dest.real).await.is_ok() {
        return Err(skiff_core::Error::AlreadyExists(dest.canonical.clone()).into());
    }

    let size = tree_size(&source.real).await?;
    if let Some(parent) = dest.real.parent() {
        fs::create_dir_all(parent).await?;
    }
    mark_web_origin(&state, &source).await;
    mark_web_origin(&state, &dest).await;
    fs::rename(&source.real, &dest.real).await?;

    // Cross-principal moves charge both sides.
    let source_owner = owner_for(&source, &user, &state.db.drives).await?;
    let dest_owner = owner_for(&dest, &user, &state.db.drives).await?;
    if source_owner != dest_owner {
        state.quota.apply_delta(source_owner, -size).await?;
        state.quota.apply_delta(dest_owner, size).await?;
    }

    state
        .audit
        .record(
            NewAuditEvent::new(event::FILE_MOVE, &source.canonical)
                .actor(user.id)
                .details(json!({ "to": dest.canonical, "bytes": size })),
        )
        .await;
    publish(&state, FsOp::Remove, &source, &user, metadata.is_dir()).await;
    publish(&state, FsOp::Create, &dest, &user, metadata.is_dir()).await;

    Ok(Json(ApiResponse::success(FileEntry {
        name: file_name(&dest.real),
        path: dest.canonical.clone(),
        is_dir: metadata.is_dir(),
        size,
        modified: Some(Utc::now()),
    })))
}

/// POST /api/files/copy/{*path}: copy with `(n)` suffixing on collision.
pub async fn duplicate(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Json(request): Json<DestinationRequest>,
) -> AppResult<Json<ApiResponse<FileEntry>>> {
    let source = state.resolver.resolve(&path, Some(&user))?;
    state
        .acl
        .require(Some(&user), &source, AccessIntent::Read)
        .await?;
    let mut dest = state.resolver.resolve(&request.destination, Some(&user))?;
    if fs::metadata(&dest.real).await.is_ok_and(|m| m.is_dir()) {
        let target = format!(
            "{}/{}",
            dest.canonical.trim_end_matches('/'),
            file_name(&source.real)
        );
        dest = state.resolver.resolve(&target, Some(&user))?;
    }
    dest = free_variant(&state, &user, dest).await?;
    state
        .acl
        .require(Some(&user), &dest, AccessIntent::Write)
        .await?;

    let metadata = fs::symlink_metadata(&source.real)
        .await
        .map_err(|_| AppError::not_found(source.canonical.clone()))?;
    let size = tree_size(&source.real).await?;

    let dest_owner = owner_for(&dest, &user, &state.db.drives).await?;
    let usage = state.quota.usage(dest_owner).await?;
    if usage.quota > 0 && usage.used + size > usage.quota {
        return Err(
            skiff_core::Error::QuotaExceeded(format!("copy of {size} bytes exceeds quota")).into(),
        );
    }

    if let Some(parent) = dest.real.parent() {
        fs::create_dir_all(parent).await?;
    }
    mark_web_origin(&state, &dest).await;
    copy_tree(source.real.clone(), dest.real.clone()).await?;

    state.quota.apply_delta(dest_owner, size).await?;
    state
        .audit
        .record(
            NewAuditEvent::new(event::FILE_COPY, &source.canonical)
                .actor(user.id)
                .details(json!({ "to": dest.canonical, "bytes": size })),
        )
        .await;
    publish(&state, FsOp::Create, &dest, &user, metadata.is_dir()).await;

    Ok(Json(ApiResponse::success(FileEntry {
        name: file_name(&dest.real),
        path: dest.canonical.clone(),
        is_dir: metadata.is_dir(),
        size,
        modified: Some(Utc::now()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateFolder {
    pub path: String,
}

/// POST /api/folders
pub async fn create_folder(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateFolder>,
) -> AppResult<Json<ApiResponse<FileEntry>>> {
    let resolved = state.resolver.resolve(&request.path, Some(&user))?;
    if resolved.is_class_root() {
        return Err(skiff_core::Error::AlreadyExists(resolved.canonical.clone()).into());
    }
    validate_name(&file_name(&resolved.real))?;
    state
        .acl
        .require(Some(&user), &resolved, AccessIntent::Write)
        .await?;
    if fs::symlink_metadata(&resolved.real).await.is_ok() {
        return Err(skiff_core::Error::AlreadyExists(resolved.canonical.clone()).into());
    }

    mark_web_origin(&state, &resolved).await;
    fs::create_dir_all(&resolved.real).await?;
    publish(&state, FsOp::Create, &resolved, &user, true).await;

    Ok(Json(ApiResponse::success(FileEntry {
        name: file_name(&resolved.real),
        path: resolved.canonical.clone(),
        is_dir: true,
        size: 0,
        modified: Some(Utc::now()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFolderQuery {
    #[serde(default)]
    pub force: bool,
}

/// DELETE /api/folders/{*path}: removes an empty directory; `?force=true`
/// moves a non-empty one to trash instead.
pub async fn delete_folder(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Query(query): Query<DeleteFolderQuery>,
) -> AppResult<Json<ApiResponse<()>>> {
    let resolved = state.resolver.resolve(&path, Some(&user))?;
    if resolved.is_class_root() {
        return Err(
            skiff_core::Error::InvalidPath(format!("cannot delete {}", resolved.canonical)).into(),
        );
    }
    state
        .acl
        .require(Some(&user), &resolved, AccessIntent::Write)
        .await?;

    let mut entries = fs::read_dir(&resolved.real)
        .await
        .map_err(|_| AppError::not_found(resolved.canonical.clone()))?;
    let is_empty = entries.next_entry().await?.is_none();
    drop(entries);

    if is_empty {
        mark_web_origin(&state, &resolved).await;
        fs::remove_dir(&resolved.real).await?;
        state
            .audit
            .record(NewAuditEvent::new(event::FILE_DELETE, &resolved.canonical).actor(user.id))
            .await;
        publish(&state, FsOp::Remove, &resolved, &user, true).await;
    } else if query.force {
        mark_web_origin(&state, &resolved).await;
        state.trash.move_to_trash(&user, &path).await?;
    } else {
        return Err(skiff_core::Error::Conflict(format!(
            "{} is not empty",
            resolved.canonical
        ))
        .into());
    }
    Ok(Json(ApiResponse::success(())))
}

/// GET /api/stats: the caller's storage dashboard numbers.
pub async fn stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<ApiResponse<UsageReport>>> {
    let usage = state
        .quota
        .usage(skiff_model::StorageOwner::User(user.id))
        .await?;
    let trash = state.trash.stats(&user).await?;
    Ok(Json(ApiResponse::success(UsageReport {
        storage_used: usage.used,
        storage_quota: usage.quota,
        trash_used: usage.trash_used,
        trash_items: trash.items,
    })))
}

async fn require_unlocked(state: &AppState, canonical: &str, user: &User) -> AppResult<()> {
    if let Some(lock) = state.locks.holder(canonical).await? {
        if lock.locked_by != user.id && !user.is_admin {
            return Err(skiff_core::Error::LockHeld {
                holder: lock.locked_by.to_string(),
                until: lock.expires_at,
            }
            .into());
        }
    }
    Ok(())
}

/// Tags the on-disk path so the watcher does not re-attribute this
/// operation to SMB.
async fn mark_web_origin(state: &AppState, resolved: &Resolved) {
    mark_web_origin_path(state, &resolved.real).await;
}

async fn mark_web_origin_path(state: &AppState, real: &FsPath) {
    let settings = state.settings.current().await;
    state.web_origin.mark(
        real.to_string_lossy().into_owned(),
        Duration::from_secs(settings.web_origin_tag_seconds.max(1) as u64),
    );
}

async fn publish(state: &AppState, op: FsOp, resolved: &Resolved, user: &User, is_dir: bool) {
    state
        .hub
        .publish(&ChangeEvent {
            op,
            path: resolved.canonical.clone(),
            is_dir,
            owner: match resolved.class {
                StorageClass::Home => Some(user.id),
                _ => None,
            },
            actor: Some(user.id),
            ts: Utc::now(),
        })
        .await;
}

fn file_name(path: &FsPath) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First collision-free `name (n)` variant of a destination.
async fn free_variant(
    state: &AppState,
    user: &User,
    dest: Resolved,
) -> AppResult<Resolved> {
    if fs::symlink_metadata(&dest.real).await.is_err() {
        return Ok(dest);
    }
    let (stem, ext) = match dest.canonical.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') && !stem.is_empty() && !stem.ends_with('/') => {
            (stem.to_string(), Some(ext.to_string()))
        }
        _ => (dest.canonical.clone(), None),
    };
    for n in 1..=100 {
        let candidate = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let resolved = state.resolver.resolve(&candidate, Some(user))?;
        if fs::symlink_metadata(&resolved.real).await.is_err() {
            return Ok(resolved);
        }
    }
    Err(skiff_core::Error::Conflict("no free copy name".to_string()).into())
}

/// Recursive tree copy off the async runtime.
async fn copy_tree(from: std::path::PathBuf, to: std::path::PathBuf) -> AppResult<()> {
    tokio::task::spawn_blocking(move || copy_tree_blocking(&from, &to))
        .await
        .map_err(|e| AppError::internal(format!("copy task: {e}")))?
        .map_err(AppError::from)
}

fn copy_tree_blocking(from: &FsPath, to: &FsPath) -> Result<(), skiff_core::Error> {
    let metadata = std::fs::symlink_metadata(from)?;
    if metadata.is_dir() {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_tree_blocking(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else if metadata.is_file() {
        std::fs::copy(from, to)?;
    }
    Ok(())
}
