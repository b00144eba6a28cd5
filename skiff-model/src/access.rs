use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{DriveId, UserId};

/// Entity id used on group-typed ACL entries that grant access to everyone,
/// including unauthenticated callers.
pub const PUBLIC_ENTITY_ID: Uuid = Uuid::nil();

/// Permission granted on a subtree. Ordered so that `ReadWrite > Read > None`
/// compares the way callers expect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    Read,
    ReadWrite,
}

impl AccessLevel {
    pub fn as_i16(&self) -> i16 {
        match self {
            AccessLevel::None => 0,
            AccessLevel::Read => 1,
            AccessLevel::ReadWrite => 2,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            2 => AccessLevel::ReadWrite,
            1 => AccessLevel::Read,
            _ => AccessLevel::None,
        }
    }

    pub fn allows_write(&self) -> bool {
        matches!(self, AccessLevel::ReadWrite)
    }
}

/// A shared drive: one subtree under `<dataRoot>/shared/` visible to its
/// members at `/shared/<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedDrive {
    pub id: DriveId,
    pub name: String,
    pub storage_quota: i64,
    pub storage_used: i64,
    pub is_active: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Membership row joining a user to a shared drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveMembership {
    pub drive_id: DriveId,
    pub user_id: UserId,
    pub level: AccessLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclEntityType {
    User,
    Group,
}

impl AclEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AclEntityType::User => "user",
            AclEntityType::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(AclEntityType::User),
            "group" => Some(AclEntityType::Group),
            _ => None,
        }
    }
}

/// Fine-grained permission override on a virtual path prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub path: String,
    pub entity_type: AclEntityType,
    pub entity_id: Uuid,
    pub level: AccessLevel,
}

impl AclEntry {
    /// Whether this entry grants to everyone (public group entry).
    pub fn is_public(&self) -> bool {
        self.entity_type == AclEntityType::Group && self.entity_id == PUBLIC_ENTITY_ID
    }
}

/// The principal whose byte counter an operation charges: a user's home
/// subtree or a shared drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum StorageOwner {
    User(UserId),
    Drive(DriveId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_levels_order() {
        assert!(AccessLevel::ReadWrite > AccessLevel::Read);
        assert!(AccessLevel::Read > AccessLevel::None);
        assert!(AccessLevel::ReadWrite.allows_write());
        assert!(!AccessLevel::Read.allows_write());
    }

    #[test]
    fn access_level_int_round_trip() {
        for level in [AccessLevel::None, AccessLevel::Read, AccessLevel::ReadWrite] {
            assert_eq!(AccessLevel::from_i16(level.as_i16()), level);
        }
    }
}
