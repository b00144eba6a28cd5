use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsOp {
    Create,
    Write,
    Remove,
    Rename,
}

impl FsOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsOp::Create => "create",
            FsOp::Write => "write",
            FsOp::Remove => "remove",
            FsOp::Rename => "rename",
        }
    }
}

/// A change observed in the tree, addressed by virtual path and fanned out
/// to subscribers.
///
/// `owner` is set for events inside a home subtree (the subtree's user);
/// such events are only ever delivered to that user or admins. For shared
/// drives `owner` is `None` and delivery is gated by the ACL engine.
/// `actor` is who caused the change when attribution succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: FsOp,
    pub path: String,
    pub is_dir: bool,
    pub owner: Option<UserId>,
    pub actor: Option<UserId>,
    pub ts: DateTime<Utc>,
}
