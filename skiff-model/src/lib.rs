//! Core data model definitions shared across Skiff crates.
#![allow(missing_docs)]

pub mod access;
pub mod annotate;
pub mod audit;
pub mod error;
pub mod events;
pub mod files;
pub mod ids;
pub mod lock;
pub mod notification;
pub mod settings;
pub mod share;
pub mod trash;
pub mod user;

// Intentionally curated re-exports for downstream consumers.
pub use access::{
    AccessLevel, AclEntityType, AclEntry, DriveMembership, SharedDrive,
    StorageOwner, PUBLIC_ENTITY_ID,
};
pub use annotate::FileAnnotation;
pub use audit::{event, AuditEvent, AuditQuery, NewAuditEvent};
pub use error::{ModelError, Result as ModelResult};
pub use events::{ChangeEvent, FsOp};
pub use files::{DirListing, FileEntry, SortKey, SortOrder, StorageClass, UsageReport};
pub use ids::{DriveId, FileShareId, ShareId, TrashId, UploadId, UserId};
pub use lock::{FileLock, LockAttempt};
pub use notification::{NewNotification, Notification};
pub use settings::{SettingRow, Settings};
pub use share::{FileShare, ShareToken, ShareType};
pub use trash::{TrashItem, TrashStats};
pub use user::{Claims, LoginRequest, NewUser, TotpLoginRequest, User};
