//! Resumable upload endpoints (tus-style) plus a one-shot multipart
//! variant.
//!
//! Wire contract: `POST /api/upload` with `Upload-Length` and
//! `Upload-Metadata` (comma-separated `key base64value` pairs, `path`
//! carrying the destination) answers `201` with a `Location`;
//! `PATCH /api/upload/{id}` appends at `Upload-Offset`;
//! `HEAD` reports the current offset; `DELETE` aborts.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use skiff_core::uploads::AppendOutcome;
use skiff_model::{UploadId, User};

use crate::api::ApiResponse;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::users::auth::middleware::client_ip;

const TUS_VERSION: &str = "1.0.0";

fn tus_headers(response: &mut Response) {
    response
        .headers_mut()
        .insert("Tus-Resumable", TUS_VERSION.parse().expect("static header"));
}

/// Decodes an `Upload-Metadata` header into `(key, value)` pairs.
fn parse_upload_metadata(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, ' ');
            let key = parts.next()?.to_string();
            let value = parts
                .next()
                .and_then(|v| BASE64.decode(v).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_default();
            if key.is_empty() { None } else { Some((key, value)) }
        })
        .collect()
}

fn header_u64(headers: &HeaderMap, name: &str) -> AppResult<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::bad_request(format!("missing or invalid {name} header")))
}

/// POST /api/upload: announce a resumable upload.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let length = header_u64(&headers, "Upload-Length")?;
    let metadata = headers
        .get("Upload-Metadata")
        .and_then(|v| v.to_str().ok())
        .map(parse_upload_metadata)
        .unwrap_or_default();

    let mut dest = metadata
        .iter()
        .find(|(k, _)| k == "path" || k == "filename")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| AppError::bad_request("Upload-Metadata must carry a path"))?;
    if !dest.starts_with('/') {
        dest = format!("/home/{dest}");
    }
    // A username claim that contradicts the session is a spoof attempt.
    if let Some((_, claimed)) = metadata.iter().find(|(k, _)| k == "username") {
        if claimed != &user.username {
            return Err(AppError::forbidden("metadata username mismatch"));
        }
    }

    let id = state
        .uploads
        .create(&user, &dest, length, client_ip(&headers))
        .await?;

    let mut response = (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/upload/{id}"))],
    )
        .into_response();
    tus_headers(&mut response);
    Ok(response)
}

/// HEAD /api/upload/{id}
pub async fn head(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<UploadId>,
) -> AppResult<Response> {
    let (offset, length) = state.uploads.offset(&user, id).await?;
    let mut response = StatusCode::OK.into_response();
    tus_headers(&mut response);
    let headers = response.headers_mut();
    headers.insert("Upload-Offset", offset.into());
    headers.insert("Upload-Length", length.into());
    headers.insert(header::CACHE_CONTROL, "no-store".parse().expect("static"));
    Ok(response)
}

/// PATCH /api/upload/{id}
pub async fn append(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<UploadId>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let offset = header_u64(&headers, "Upload-Offset")?;
    let outcome = state.uploads.append(&user, id, offset, &body).await?;

    let new_offset = match outcome {
        AppendOutcome::Offset(offset) => offset,
        AppendOutcome::Completed { bytes, .. } => bytes,
    };
    let mut response = StatusCode::NO_CONTENT.into_response();
    tus_headers(&mut response);
    response.headers_mut().insert("Upload-Offset", new_offset.into());
    Ok(response)
}

/// DELETE /api/upload/{id}
pub async fn terminate(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<UploadId>,
) -> AppResult<Response> {
    state.uploads.terminate(&user, id).await?;
    let mut response = StatusCode::NO_CONTENT.into_response();
    tus_headers(&mut response);
    Ok(response)
}

/// POST /api/upload/simple: non-resumable multipart upload. Fields: an
/// optional `path` naming the destination directory, then one or more
/// `file` parts.
pub async fn simple(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let ip = client_ip(&headers);
    let mut dir = "/home".to_string();
    let mut uploaded = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("multipart: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("path") => {
                dir = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("multipart: {e}")))?;
            }
            Some("file") | Some("files") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file part without a filename"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(format!("multipart: {e}")))?;

                let dest = format!("{}/{}", dir.trim_end_matches('/'), filename);
                let id = state
                    .uploads
                    .create(&user, &dest, data.len() as u64, ip.clone())
                    .await?;
                match state.uploads.append(&user, id, 0, &data).await {
                    Ok(AppendOutcome::Completed { path, .. }) => uploaded.push(path),
                    Ok(AppendOutcome::Offset(_)) => {
                        // Zero-length declared uploads complete on create;
                        // anything else finishing short is a logic error.
                        state.uploads.terminate(&user, id).await?;
                        return Err(AppError::internal("one-shot upload did not complete"));
                    }
                    Err(err) => {
                        state.uploads.terminate(&user, id).await?;
                        return Err(err.into());
                    }
                }
            }
            _ => continue,
        }
    }

    if uploaded.is_empty() {
        return Err(AppError::bad_request("no file parts in request"));
    }
    Ok(Json(
        ApiResponse::success(uploaded).with_message("upload complete".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_metadata_decodes_base64_values() {
        let pairs = parse_upload_metadata("path aGVsbG8udHh0,username YWxpY2U=");
        assert_eq!(
            pairs,
            vec![
                ("path".to_string(), "hello.txt".to_string()),
                ("username".to_string(), "alice".to_string()),
            ]
        );
    }

    #[test]
    fn upload_metadata_tolerates_flag_keys() {
        let pairs = parse_upload_metadata("is_confidential");
        assert_eq!(pairs, vec![("is_confidential".to_string(), String::new())]);
    }

    #[test]
    fn json_error_shape_for_missing_header() {
        let err = AppError::bad_request("missing or invalid Upload-Length header");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(json!({"k": err.kind}).to_string().contains("missing-parameter"));
    }
}
