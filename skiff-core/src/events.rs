//! Publish/subscribe fan-out of tree change events.
//!
//! Each subscription owns a bounded broadcast channel (64 events); a slow
//! subscriber lags and loses its oldest undelivered events only, surfaced
//! to it as a lag count it adds to its drop counter. Permissions are
//! re-checked on every delivery, so a revocation takes effect within one
//! event instead of at resubscribe time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use skiff_model::{ChangeEvent, User};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::acl::AclEngine;

const SUBSCRIBER_BUFFER: usize = 64;

struct SubEntry {
    user: User,
    paths: Vec<String>,
    tx: broadcast::Sender<ChangeEvent>,
    drops: Arc<AtomicU64>,
}

pub struct Subscription {
    pub id: Uuid,
    pub rx: broadcast::Receiver<ChangeEvent>,
    /// Events dropped for this subscriber because it was too slow.
    pub drops: Arc<AtomicU64>,
}

pub struct EventHub {
    acl: Arc<AclEngine>,
    subs: DashMap<Uuid, SubEntry>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subs.len())
            .finish()
    }
}

impl EventHub {
    pub fn new(acl: Arc<AclEngine>) -> Self {
        Self {
            acl,
            subs: DashMap::new(),
        }
    }

    /// Registers a subscriber interested in the given path prefixes. An
    /// empty prefix list subscribes to everything the user may read.
    pub fn subscribe(&self, user: User, paths: Vec<String>) -> Subscription {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_BUFFER);
        let drops = Arc::new(AtomicU64::new(0));
        let id = Uuid::new_v4();
        self.subs.insert(
            id,
            SubEntry {
                user,
                paths,
                tx,
                drops: Arc::clone(&drops),
            },
        );
        Subscription { id, rx, drops }
    }

    /// Idempotent; buffered events are released with the channel.
    pub fn cancel(&self, id: Uuid) {
        self.subs.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    /// Delivers `event` to every subscriber whose prefixes match and whose
    /// principal may still read the event's path.
    pub async fn publish(&self, event: &ChangeEvent) {
        // Snapshot matching subscribers first; the permission check awaits
        // and must not run under the map's shard locks.
        let candidates: Vec<(User, broadcast::Sender<ChangeEvent>)> = self
            .subs
            .iter()
            .filter(|entry| prefix_match(&entry.paths, &event.path))
            .map(|entry| (entry.user.clone(), entry.tx.clone()))
            .collect();

        for (user, tx) in candidates {
            let allowed = match event.owner {
                Some(owner) => owner == user.id || user.is_admin,
                None => self.acl.can_read_virtual(&user, &event.path).await,
            };
            if allowed {
                // A send error just means the subscriber vanished between
                // snapshot and delivery.
                let _ = tx.send(event.clone());
            }
        }
    }
}

fn prefix_match(prefixes: &[String], path: &str) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    prefixes.iter().any(|prefix| {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;
    use crate::database::ports::drives::DrivesRepository;
    use chrono::Utc;
    use skiff_model::{AccessLevel, DriveId, DriveMembership, FsOp, SharedDrive, UserId};

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

    fn event(path: &str, owner: Option<UserId>) -> ChangeEvent {
        ChangeEvent {
            op: FsOp::Write,
            path: path.to_string(),
            is_dir: false,
            owner,
            actor: None,
            ts: Utc::now(),
        }
    }

    async fn hub_with_drive(member: &User) -> (EventHub, SharedDrive) {
        let db = MemoryDb::new();
        let drive = SharedDrive {
            id: DriveId::new(),
            name: "team".to_string(),
            storage_quota: 0,
            storage_used: 0,
            is_active: true,
            created_by: member.id,
            created_at: Utc::now(),
        };
        db.drives.create(&drive).await.unwrap();
        db.drives
            .add_member(&DriveMembership {
                drive_id: drive.id,
                user_id: member.id,
                level: AccessLevel::Read,
            })
            .await
            .unwrap();
        let acl = Arc::new(AclEngine::new(db.drives.clone(), db.acl.clone()));
        (EventHub::new(acl), drive)
    }

    #[tokio::test]
    async fn home_events_reach_only_their_owner() {
        let alice = user("alice", false);
        let bob = user("bob", false);
        let (hub, _) = hub_with_drive(&alice).await;

        let mut alice_sub = hub.subscribe(alice.clone(), vec!["/home".into()]);
        let mut bob_sub = hub.subscribe(bob.clone(), vec!["/home".into()]);

        hub.publish(&event("/home/docs/a.txt", Some(alice.id))).await;

        assert!(alice_sub.rx.try_recv().is_ok());
        assert!(bob_sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shared_events_gate_on_membership_per_delivery() {
        let alice = user("alice", false);
        let mallory = user("mallory", false);
        let (hub, _) = hub_with_drive(&alice).await;

        let mut member = hub.subscribe(alice.clone(), vec![]);
        let mut outsider = hub.subscribe(mallory.clone(), vec![]);

        hub.publish(&event("/shared/team/spec.md", None)).await;

        assert!(member.rx.try_recv().is_ok());
        assert!(outsider.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn prefix_filter_limits_delivery() {
        let alice = user("alice", false);
        let (hub, _) = hub_with_drive(&alice).await;

        let mut sub = hub.subscribe(alice.clone(), vec!["/home/photos".into()]);
        hub.publish(&event("/home/docs/a.txt", Some(alice.id))).await;
        assert!(sub.rx.try_recv().is_err());

        hub.publish(&event("/home/photos/b.jpg", Some(alice.id))).await;
        assert!(sub.rx.try_recv().is_ok());

        // Prefix must match on a segment boundary.
        hub.publish(&event("/home/photos2/c.jpg", Some(alice.id))).await;
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_stops_delivery_and_is_idempotent() {
        let alice = user("alice", false);
        let (hub, _) = hub_with_drive(&alice).await;

        let sub = hub.subscribe(alice.clone(), vec![]);
        assert_eq!(hub.subscriber_count(), 1);
        hub.cancel(sub.id);
        hub.cancel(sub.id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events_only() {
        let alice = user("alice", false);
        let (hub, _) = hub_with_drive(&alice).await;

        let mut sub = hub.subscribe(alice.clone(), vec![]);
        for i in 0..(SUBSCRIBER_BUFFER + 8) {
            hub.publish(&event(&format!("/home/f{i}"), Some(alice.id))).await;
        }

        // The first recv reports the lag; following recvs yield the newest
        // buffered events.
        match sub.rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                sub.drops.fetch_add(n, Ordering::Relaxed);
                assert!(n >= 8);
            }
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(sub.rx.try_recv().is_ok());
    }
}
