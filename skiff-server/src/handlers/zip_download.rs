//! Multi-path ZIP download. Every requested path is permission-checked
//! before any archive byte is produced, so an inaccessible entry fails the
//! whole request instead of truncating the archive.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use skiff_core::acl::AccessIntent;
use skiff_model::User;

use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct ZipRequest {
    pub paths: Vec<String>,
}

/// POST /api/download/zip
pub async fn download_zip(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<ZipRequest>,
) -> AppResult<Response> {
    if request.paths.is_empty() {
        return Err(AppError::bad_request("paths must not be empty"));
    }

    // Full ACL pass first; no bytes leave before every path clears.
    let mut entries: Vec<(String, PathBuf)> = Vec::with_capacity(request.paths.len());
    for path in &request.paths {
        let resolved = state.resolver.resolve(path, Some(&user))?;
        state
            .acl
            .require(Some(&user), &resolved, AccessIntent::Read)
            .await?;
        if tokio::fs::symlink_metadata(&resolved.real).await.is_err() {
            return Err(AppError::not_found(resolved.canonical.clone()));
        }
        let name = resolved
            .real
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::bad_request(format!("{path} has no archivable name")))?;
        entries.push((name, resolved.real));
    }

    let archive = tokio::task::spawn_blocking(move || build_archive(&entries))
        .await
        .map_err(|e| AppError::internal(format!("zip task: {e}")))??;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"download.zip\"",
        )
        .header(header::CONTENT_LENGTH, archive.len())
        .body(Body::from(archive))
        .map_err(|e| AppError::internal(e.to_string()))
}

fn build_archive(entries: &[(String, PathBuf)]) -> Result<Vec<u8>, AppError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for (name, real) in entries {
        add_entry(&mut writer, name, real, options)
            .map_err(|e| AppError::internal(format!("archiving {name}: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| AppError::internal(format!("finishing archive: {e}")))?;
    Ok(cursor.into_inner())
}

fn add_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    real: &Path,
    options: SimpleFileOptions,
) -> anyhow::Result<()> {
    let metadata = std::fs::symlink_metadata(real)?;
    if metadata.is_dir() {
        writer.add_directory(format!("{name}/"), options)?;
        for entry in std::fs::read_dir(real)? {
            let entry = entry?;
            let child = entry.file_name().to_string_lossy().into_owned();
            add_entry(writer, &format!("{name}/{child}"), &entry.path(), options)?;
        }
    } else if metadata.is_file() {
        writer.start_file(name, options)?;
        let mut file = std::fs::File::open(real)?;
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read])?;
        }
    }
    Ok(())
}
