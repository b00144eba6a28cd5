use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// HTTP-facing error: a status code, a stable kebab-case kind, and a
/// message safe to show callers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "missing-parameter", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<skiff_core::Error> for AppError {
    fn from(err: skiff_core::Error) -> Self {
        use skiff_core::Error as E;
        let status = match &err {
            E::Unauthenticated(_)
            | E::TokenInvalid(_)
            | E::TokenExpired
            | E::PasswordRequired
            | E::PasswordWrong
            | E::LoginRequired => StatusCode::UNAUTHORIZED,
            E::Forbidden(_)
            | E::AccountLocked
            | E::IpLocked
            | E::ShareRevoked
            | E::AccessLimitReached => StatusCode::FORBIDDEN,
            E::NotFound(_) => StatusCode::NOT_FOUND,
            E::AlreadyExists(_) | E::Conflict(_) | E::OffsetMismatch { .. } => {
                StatusCode::CONFLICT
            }
            E::InvalidPath(_)
            | E::InvalidFilename(_)
            | E::PathEscape(_)
            | E::MissingParameter(_)
            | E::UploadIncomplete(_) => StatusCode::BAD_REQUEST,
            E::UploadOrphaned(_) => StatusCode::GONE,
            E::QuotaExceeded(_) | E::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            E::LockHeld { .. } => StatusCode::LOCKED,
            E::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            E::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            E::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            E::Database(_) | E::Io(_) | E::Serialization(_) | E::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // Infrastructure detail stays in the logs, not in responses.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {err}");
            "internal error".to_string()
        } else {
            err.to_string()
        };
        Self::new(status, err.kind(), message)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        skiff_core::Error::from(err).into()
    }
}

impl From<skiff_model::ModelError> for AppError {
    fn from(err: skiff_model::ModelError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid-filename", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_expected_statuses() {
        let cases: Vec<(skiff_core::Error, StatusCode)> = vec![
            (
                skiff_core::Error::PathEscape("/x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                skiff_core::Error::QuotaExceeded("full".into()),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (skiff_core::Error::AccessLimitReached, StatusCode::FORBIDDEN),
            (
                skiff_core::Error::OffsetMismatch {
                    expected: 4,
                    got: 6,
                },
                StatusCode::CONFLICT,
            ),
            (skiff_core::Error::AccountLocked, StatusCode::FORBIDDEN),
            (
                skiff_core::Error::StorageUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            let app: AppError = err.into();
            assert_eq!(app.status, status, "kind {kind}");
            assert_eq!(app.kind, kind);
        }
    }
}
