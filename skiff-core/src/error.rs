use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core error taxonomy. Every variant maps to a stable kebab-case kind via
/// [`Error::kind`], which the HTTP adapter uses for response bodies and
/// status codes. Details never carry hashes or secrets.
#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("token invalid: {0}")]
    TokenInvalid(String),

    #[error("token expired")]
    TokenExpired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("path escapes its storage root: {0}")]
    PathEscape(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("lock held by {holder} until {until}")]
    LockHeld {
        holder: String,
        until: DateTime<Utc>,
    },

    #[error("offset mismatch: expected {expected}, got {got}")]
    OffsetMismatch { expected: u64, got: u64 },

    #[error("upload incomplete: {0}")]
    UploadIncomplete(String),

    #[error("upload orphaned: {0}")]
    UploadOrphaned(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("account locked")]
    AccountLocked,

    #[error("source address locked")]
    IpLocked,

    #[error("share link revoked")]
    ShareRevoked,

    #[error("share password required")]
    PasswordRequired,

    #[error("share password wrong")]
    PasswordWrong,

    #[error("login required")]
    LoginRequired,

    #[error("share access limit reached")]
    AccessLimitReached,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Forbidden(_) => "forbidden",
            Error::TokenInvalid(_) => "token-invalid",
            Error::TokenExpired => "token-expired",
            Error::NotFound(_) => "not-found",
            Error::AlreadyExists(_) => "already-exists",
            Error::Conflict(_) => "conflict",
            Error::InvalidPath(_) => "invalid-path",
            Error::InvalidFilename(_) => "invalid-filename",
            Error::PathEscape(_) => "path-escape",
            Error::MissingParameter(_) => "missing-parameter",
            Error::QuotaExceeded(_) => "quota-exceeded",
            Error::FileTooLarge(_) => "file-too-large",
            Error::StorageUnavailable(_) => "storage-unavailable",
            Error::LockHeld { .. } => "lock-held",
            Error::OffsetMismatch { .. } => "offset-mismatch",
            Error::UploadIncomplete(_) => "upload-incomplete",
            Error::UploadOrphaned(_) => "upload-orphaned",
            Error::RateLimited(_) => "rate-limited",
            Error::AccountLocked => "account-locked",
            Error::IpLocked => "ip-locked",
            Error::ShareRevoked => "revoked",
            Error::PasswordRequired => "password-required",
            Error::PasswordWrong => "password-wrong",
            Error::LoginRequired => "login-required",
            Error::AccessLimitReached => "access-limit-reached",
            Error::DeadlineExceeded => "deadline-exceeded",
            Error::Database(_) => "database-error",
            Error::Io(_) => "internal",
            Error::Serialization(_) => "internal",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<skiff_model::ModelError> for Error {
    fn from(err: skiff_model::ModelError) -> Self {
        Error::InvalidFilename(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
