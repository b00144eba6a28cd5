//! Permission computation.
//!
//! Rules are evaluated in a fixed order with first match winning: admin,
//! home ownership, drive membership, fine-grained ACL entries, deny.
//! Positive membership decisions are cached for five minutes per
//! `(principal, drive)`; negatives are never cached so a lockout or
//! membership removal takes effect immediately after invalidation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use skiff_model::{
    AccessLevel, AclEntry, SharedDrive, StorageClass, User, UserId,
};

use crate::database::ports::{AclRepository, DrivesRepository};
use crate::error::{Error, Result};
use crate::paths::Resolved;

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct AccessDecision {
    pub allowed: bool,
    pub level: AccessLevel,
    pub reason: &'static str,
}

impl AccessDecision {
    fn deny(reason: &'static str) -> Self {
        Self {
            allowed: false,
            level: AccessLevel::None,
            reason,
        }
    }

    fn grant(level: AccessLevel, reason: &'static str) -> Self {
        Self {
            allowed: true,
            level,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedLevel {
    level: AccessLevel,
    expires: Instant,
}

pub struct AclEngine {
    drives: Arc<dyn DrivesRepository>,
    acl: Arc<dyn AclRepository>,
    membership_cache: DashMap<(UserId, String), CachedLevel>,
}

impl std::fmt::Debug for AclEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclEngine")
            .field("cached_entries", &self.membership_cache.len())
            .finish()
    }
}

impl AclEngine {
    pub fn new(drives: Arc<dyn DrivesRepository>, acl: Arc<dyn AclRepository>) -> Self {
        Self {
            drives,
            acl,
            membership_cache: DashMap::new(),
        }
    }

    /// Computes the decision for `(principal, target, intent)`.
    pub async fn check(
        &self,
        principal: Option<&User>,
        target: &Resolved,
        intent: AccessIntent,
    ) -> Result<AccessDecision> {
        let decision = self.check_read(principal, target).await?;
        if !decision.allowed {
            return Ok(decision);
        }
        if intent == AccessIntent::Write && !decision.level.allows_write() {
            return Ok(AccessDecision {
                allowed: false,
                level: decision.level,
                reason: "read-only",
            });
        }
        Ok(decision)
    }

    /// Like [`check`](Self::check) but maps denials to typed errors.
    pub async fn require(
        &self,
        principal: Option<&User>,
        target: &Resolved,
        intent: AccessIntent,
    ) -> Result<AccessDecision> {
        let decision = self.check(principal, target, intent).await?;
        if decision.allowed {
            return Ok(decision);
        }
        match decision.reason {
            "unauthenticated" => Err(Error::Unauthenticated(target.canonical.clone())),
            reason => Err(Error::Forbidden(format!(
                "{} ({reason})",
                target.canonical
            ))),
        }
    }

    async fn check_read(
        &self,
        principal: Option<&User>,
        target: &Resolved,
    ) -> Result<AccessDecision> {
        let Some(user) = principal else {
            return Ok(AccessDecision::deny("unauthenticated"));
        };

        if target.class == StorageClass::Root {
            // The root is an index, never byte access; visibility of its
            // entries is filtered by `visible_drives`.
            return Ok(AccessDecision::grant(AccessLevel::Read, "index"));
        }

        if user.is_admin {
            return Ok(AccessDecision::grant(AccessLevel::ReadWrite, "admin"));
        }

        match target.class {
            StorageClass::Home => {
                if target.home_user.as_deref() == Some(user.username.as_str()) {
                    Ok(AccessDecision::grant(AccessLevel::ReadWrite, "owner"))
                } else {
                    Ok(AccessDecision::deny("foreign-home"))
                }
            }
            StorageClass::Shared => {
                let drive = target
                    .drive
                    .as_deref()
                    .ok_or_else(|| Error::Internal("shared path without drive".to_string()))?;
                if let Some(level) = self.membership_level(user.id, drive).await? {
                    return Ok(AccessDecision::grant(level, "member"));
                }
                if let Some(level) = self.acl_entry_level(user, &target.canonical).await? {
                    return Ok(AccessDecision::grant(level, "acl"));
                }
                Ok(AccessDecision::deny("no-rule"))
            }
            StorageClass::Root => unreachable!("handled above"),
        }
    }

    /// Membership level on a drive, through the TTL cache.
    async fn membership_level(&self, user: UserId, drive: &str) -> Result<Option<AccessLevel>> {
        let key = (user, drive.to_string());
        if let Some(cached) = self.membership_cache.get(&key) {
            if cached.expires > Instant::now() {
                return Ok(Some(cached.level));
            }
        }
        self.membership_cache.remove(&key);

        let Some(row) = self.drives.get_by_name(drive).await? else {
            return Ok(None);
        };
        if !row.is_active {
            return Ok(None);
        }
        let Some(membership) = self.drives.get_membership(row.id, user).await? else {
            return Ok(None);
        };
        self.membership_cache.insert(
            key,
            CachedLevel {
                level: membership.level,
                expires: Instant::now() + CACHE_TTL,
            },
        );
        Ok(Some(membership.level))
    }

    /// Deepest ACL entry on the ancestor chain that names this user (or the
    /// public group).
    async fn acl_entry_level(&self, user: &User, canonical: &str) -> Result<Option<AccessLevel>> {
        let ancestors = ancestor_chain(canonical);
        let entries = self.acl.list_for_paths(&ancestors).await?;
        // `ancestors` is ordered deepest-first, so the first hit wins.
        for ancestor in &ancestors {
            if let Some(level) = entries
                .iter()
                .filter(|e| &e.path == ancestor)
                .filter(|e| applies_to(e, user))
                .map(|e| e.level)
                .max()
            {
                return Ok(Some(level));
            }
        }
        Ok(None)
    }

    /// Drives visible at the `/shared` index: all active drives for admins,
    /// membership drives for users, and only publicly-ACL'd drives for
    /// unauthenticated callers.
    pub async fn visible_drives(&self, principal: Option<&User>) -> Result<Vec<SharedDrive>> {
        match principal {
            Some(user) if user.is_admin => {
                let drives = self.drives.list().await?;
                Ok(drives.into_iter().filter(|d| d.is_active).collect())
            }
            Some(user) => {
                let drives = self.drives.list_for_user(user.id).await?;
                Ok(drives.into_iter().map(|(d, _)| d).collect())
            }
            None => {
                let mut out = Vec::new();
                for entry in self.acl.list_public().await? {
                    let Some(name) = drive_segment(&entry.path) else {
                        continue;
                    };
                    if let Some(drive) = self.drives.get_by_name(name).await? {
                        if drive.is_active && !out.iter().any(|d: &SharedDrive| d.id == drive.id)
                        {
                            out.push(drive);
                        }
                    }
                }
                out.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(out)
            }
        }
    }

    /// Read check on a virtual path string, used per delivery by the event
    /// hub. Only shared paths reach this; home events are routed by owner.
    pub async fn can_read_virtual(&self, user: &User, vpath: &str) -> bool {
        if user.is_admin {
            return true;
        }
        let Some(drive) = drive_segment(vpath) else {
            return false;
        };
        match self.membership_level(user.id, drive).await {
            Ok(Some(_)) => true,
            Ok(None) => matches!(self.acl_entry_level(user, vpath).await, Ok(Some(_))),
            Err(_) => false,
        }
    }

    /// Drops every cached decision for one principal. Called on membership
    /// changes, admin-flag changes, and ACL writes affecting the user.
    pub fn invalidate_user(&self, user: UserId) {
        self.membership_cache.retain(|(cached, _), _| *cached != user);
    }

    pub fn invalidate_all(&self) {
        self.membership_cache.clear();
    }
}

fn applies_to(entry: &AclEntry, user: &User) -> bool {
    use skiff_model::AclEntityType;
    match entry.entity_type {
        AclEntityType::User => entry.entity_id == user.id.to_uuid(),
        AclEntityType::Group => entry.is_public(),
    }
}

/// `/shared/team/a/b` -> `["/shared/team/a/b", "/shared/team/a",
/// "/shared/team", "/shared"]`, deepest first.
fn ancestor_chain(canonical: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = canonical.trim_end_matches('/');
    while !current.is_empty() {
        out.push(current.to_string());
        match current.rfind('/') {
            Some(0) | None => break,
            Some(idx) => current = &current[..idx],
        }
    }
    out
}

fn drive_segment(vpath: &str) -> Option<&str> {
    let rest = vpath.strip_prefix("/shared/")?;
    let name = rest.split('/').next()?;
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;
    use crate::paths::PathResolver;
    use chrono::Utc;
    use skiff_model::{AclEntityType, DriveId, DriveMembership, PUBLIC_ENTITY_ID};

    fn user(name: &str, admin: bool) -> User {
        User {
            id: UserId::new(),
            username: name.to_string(),
            email: None,
            is_admin: admin,
            is_active: true,
            storage_quota: 0,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn drive(name: &str, creator: UserId) -> SharedDrive {
        SharedDrive {
            id: DriveId::new(),
            name: name.to_string(),
            storage_quota: 0,
            storage_used: 0,
            is_active: true,
            created_by: creator,
            created_at: Utc::now(),
        }
    }

    async fn engine_with_team() -> (AclEngine, User, User, SharedDrive) {
        let db = MemoryDb::new();
        let alice = user("alice", false);
        let bob = user("bob", false);
        let team = drive("team", alice.id);
        db.drives.create(&team).await.unwrap();
        db.drives
            .add_member(&DriveMembership {
                drive_id: team.id,
                user_id: alice.id,
                level: AccessLevel::ReadWrite,
            })
            .await
            .unwrap();
        let engine = AclEngine::new(db.drives.clone(), db.acl.clone());
        (engine, alice, bob, team)
    }

    fn resolve(vpath: &str, user: Option<&User>) -> Resolved {
        PathResolver::new("/data").resolve(vpath, user).unwrap()
    }

    #[tokio::test]
    async fn owner_gets_read_write_on_own_home() {
        let (engine, alice, _, _) = engine_with_team().await;
        let target = resolve("/home/docs/a.txt", Some(&alice));
        let decision = engine
            .check(Some(&alice), &target, AccessIntent::Write)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reason, "owner");
        assert_eq!(decision.level, AccessLevel::ReadWrite);
    }

    #[tokio::test]
    async fn member_level_gates_write_intent() {
        let (engine, alice, bob, team) = engine_with_team().await;
        let db_membership = DriveMembership {
            drive_id: team.id,
            user_id: bob.id,
            level: AccessLevel::Read,
        };
        engine.drives.add_member(&db_membership).await.unwrap();

        let target = resolve("/shared/team/spec.md", Some(&bob));
        let read = engine
            .check(Some(&bob), &target, AccessIntent::Read)
            .await
            .unwrap();
        assert!(read.allowed);
        assert_eq!(read.reason, "member");

        let write = engine
            .check(Some(&bob), &target, AccessIntent::Write)
            .await
            .unwrap();
        assert!(!write.allowed);
        assert_eq!(write.reason, "read-only");

        let alice_write = engine
            .check(Some(&alice), &target, AccessIntent::Write)
            .await
            .unwrap();
        assert!(alice_write.allowed);
    }

    #[tokio::test]
    async fn non_member_is_denied_and_not_cached() {
        let (engine, _, bob, team) = engine_with_team().await;
        let target = resolve("/shared/team/spec.md", Some(&bob));
        let decision = engine
            .check(Some(&bob), &target, AccessIntent::Read)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no-rule");

        // Granting membership now must take effect without invalidation
        // because negative decisions are never cached.
        engine
            .drives
            .add_member(&DriveMembership {
                drive_id: team.id,
                user_id: bob.id,
                level: AccessLevel::Read,
            })
            .await
            .unwrap();
        let decision = engine
            .check(Some(&bob), &target, AccessIntent::Read)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn cache_invalidation_drops_stale_grant() {
        let (engine, alice, _, team) = engine_with_team().await;
        let target = resolve("/shared/team/x", Some(&alice));
        assert!(
            engine
                .check(Some(&alice), &target, AccessIntent::Read)
                .await
                .unwrap()
                .allowed
        );

        engine.drives.remove_member(team.id, alice.id).await.unwrap();
        // Still cached until invalidated.
        assert!(
            engine
                .check(Some(&alice), &target, AccessIntent::Read)
                .await
                .unwrap()
                .allowed
        );
        engine.invalidate_user(alice.id);
        assert!(
            !engine
                .check(Some(&alice), &target, AccessIntent::Read)
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn acl_entry_on_ancestor_grants() {
        let (engine, _, bob, _) = engine_with_team().await;
        engine
            .acl
            .upsert(&AclEntry {
                path: "/shared/team".to_string(),
                entity_type: AclEntityType::User,
                entity_id: bob.id.to_uuid(),
                level: AccessLevel::Read,
            })
            .await
            .unwrap();
        let target = resolve("/shared/team/deep/nested/file", Some(&bob));
        let decision = engine
            .check(Some(&bob), &target, AccessIntent::Read)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reason, "acl");
    }

    #[tokio::test]
    async fn unauthenticated_sees_only_public_drives() {
        let (engine, _, _, team) = engine_with_team().await;
        assert!(engine.visible_drives(None).await.unwrap().is_empty());

        engine
            .acl
            .upsert(&AclEntry {
                path: "/shared/team".to_string(),
                entity_type: AclEntityType::Group,
                entity_id: PUBLIC_ENTITY_ID,
                level: AccessLevel::Read,
            })
            .await
            .unwrap();
        let visible = engine.visible_drives(None).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, team.id);
    }

    #[test]
    fn ancestor_chain_is_deepest_first() {
        assert_eq!(
            ancestor_chain("/shared/team/a/b"),
            vec!["/shared/team/a/b", "/shared/team/a", "/shared/team", "/shared"]
        );
    }
}
