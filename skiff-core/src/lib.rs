//! Core of the Skiff file-hosting platform: virtual-path resolution,
//! access control, locks, quotas, resumable uploads, trash, share links,
//! filesystem watching, SMB correlation, and the Postgres metadata store.
//!
//! HTTP concerns live in `skiff-server`; this crate exposes domain
//! services that take a principal and return domain results or typed
//! errors.

pub mod acl;
pub mod audit;
pub mod auth;
pub mod database;
pub mod error;
pub mod events;
pub mod locks;
pub mod paths;
pub mod quota;
pub mod settings;
pub mod shares;
pub mod smb;
pub mod trash;
pub mod ttl;
pub mod uploads;
pub mod watch;

pub use error::{Error, Result};

pub use acl::{AccessDecision, AccessIntent, AclEngine};
pub use audit::AuditRecorder;
pub use auth::LoginGuard;
pub use database::Database;
pub use events::{EventHub, Subscription};
pub use locks::{LockManager, DEFAULT_LOCK_TTL};
pub use paths::{PathResolver, Resolved, ReversePath};
pub use quota::{QuotaAccountant, UsageSnapshot};
pub use settings::SettingsCache;
pub use shares::{NewShare, ResolvedShare, ShareService};
pub use smb::SmbCorrelator;
pub use trash::TrashManager;
pub use ttl::TtlSet;
pub use uploads::{AppendOutcome, UploadMeta, UploadPipeline};
pub use watch::{TreeWatcher, WatchContext};
