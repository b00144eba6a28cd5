//! Recursive filesystem watcher over the `users/` and `shared/` subtrees.
//!
//! Raw OS notifications land in a bounded queue (drop-oldest under
//! pressure; reconciliation heals whatever was missed). A consumer task
//! debounces write bursts per path on a 500 ms wheel, classifies events,
//! resolves them back into the virtual tree, checks for advisory-lock
//! bypasses, and hands unattributed events to the SMB correlator while
//! publishing to the event hub.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use skiff_model::{audit::event, ChangeEvent, FsOp, NewAuditEvent, UserId};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::audit::AuditRecorder;
use crate::database::ports::{LocksRepository, UsersRepository};
use crate::error::{Error, Result};
use crate::events::EventHub;
use crate::paths::{PathResolver, ReversePath};
use crate::smb::{PendingChange, SmbCorrelator};
use crate::ttl::TtlSet;

const QUEUE_CAPACITY: usize = 1024;
const WRITE_DEBOUNCE: Duration = Duration::from_millis(500);
const HANDLE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WatchContext {
    pub resolver: Arc<PathResolver>,
    pub hub: Arc<EventHub>,
    pub audit: Arc<AuditRecorder>,
    pub locks: Arc<dyn LocksRepository>,
    pub users: Arc<dyn UsersRepository>,
    pub correlator: Arc<SmbCorrelator>,
    pub web_origin: Arc<TtlSet>,
}

struct EventQueue {
    inner: Mutex<VecDeque<notify::Event>>,
    wakeup: Notify,
    drops: AtomicU64,
}

impl EventQueue {
    fn push(&self, event: notify::Event) {
        {
            let mut inner = self.inner.lock();
            if inner.len() >= QUEUE_CAPACITY {
                inner.pop_front();
                self.drops.fetch_add(1, Ordering::Relaxed);
            }
            inner.push_back(event);
        }
        self.wakeup.notify_one();
    }

    fn pop(&self) -> Option<notify::Event> {
        self.inner.lock().pop_front()
    }
}

pub struct TreeWatcher {
    /// Events dropped because the inbound queue was full.
    pub drops: Arc<AtomicU64>,
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for TreeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWatcher")
            .field("drops", &self.drops.load(Ordering::Relaxed))
            .finish()
    }
}

impl TreeWatcher {
    /// Registers the OS watcher and spawns the consumer task.
    pub fn spawn(ctx: WatchContext) -> Result<Self> {
        let users_root = ctx.resolver.users_root();
        let shared_root = ctx.resolver.shared_root();
        std::fs::create_dir_all(&users_root)?;
        std::fs::create_dir_all(&shared_root)?;

        let queue = Arc::new(EventQueue {
            inner: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            drops: AtomicU64::new(0),
        });

        let callback_queue = Arc::clone(&queue);
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<notify::Event, notify::Error>| match result {
                Ok(event) => callback_queue.push(event),
                Err(e) => error!("watch error: {e}"),
            },
        )
        .map_err(|e| Error::Internal(format!("failed to create watcher: {e}")))?;

        for root in [&users_root, &shared_root] {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| Error::Internal(format!("failed to watch {}: {e}", root.display())))?;
            info!("watching {}", root.display());
        }

        let drops = Arc::new(AtomicU64::new(0));
        let task_drops = Arc::clone(&drops);
        let task_queue = Arc::clone(&queue);
        let task = tokio::spawn(async move {
            consume(ctx, task_queue, task_drops).await;
        });

        Ok(Self {
            drops,
            _watcher: watcher,
            task,
        })
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn consume(ctx: WatchContext, queue: Arc<EventQueue>, drops: Arc<AtomicU64>) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pending_writes: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        tokio::select! {
            _ = queue.wakeup.notified() => {
                while let Some(event) = queue.pop() {
                    drops.store(queue.drops.load(Ordering::Relaxed), Ordering::Relaxed);
                    for (op, path) in classify(&event) {
                        if op == FsOp::Write {
                            // One pending slot per path, replaced on repeat.
                            pending_writes.insert(path, Instant::now() + WRITE_DEBOUNCE);
                        } else {
                            pending_writes.remove(&path);
                            handle_with_timeout(&ctx, op, path).await;
                        }
                    }
                }
            }
            _ = interval.tick() => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending_writes
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending_writes.remove(&path);
                    handle_with_timeout(&ctx, FsOp::Write, path).await;
                }
            }
        }
    }
}

async fn handle_with_timeout(ctx: &WatchContext, op: FsOp, path: PathBuf) {
    if let Err(_elapsed) =
        tokio::time::timeout(HANDLE_TIMEOUT, handle(ctx, op, path.clone())).await
    {
        warn!("event handling timed out for {}", path.display());
    }
}

async fn handle(ctx: &WatchContext, op: FsOp, real: PathBuf) {
    // Staging and trash moves are internal bookkeeping, not tree changes.
    if real.starts_with(ctx.resolver.uploads_root()) || real.starts_with(ctx.resolver.trash_root())
    {
        return;
    }
    // Events the web layer already published and attributed.
    if ctx.web_origin.is_marked(&real.to_string_lossy()) {
        debug!("suppressing web-originated event for {}", real.display());
        return;
    }

    let Some(reverse) = ctx.resolver.reverse(&real) else {
        return;
    };
    let canonical = reverse.canonical();
    let owner: Option<UserId> = match &reverse {
        ReversePath::Home { username, rest } => {
            if rest.is_empty() {
                // The home directory itself appearing is provisioning noise.
                return;
            }
            match ctx.users.get_by_username(username).await {
                Ok(Some(user)) => Some(user.id),
                Ok(None) => {
                    debug!("event under unknown home subtree: {username}");
                    return;
                }
                Err(err) => {
                    warn!("owner lookup failed for {username}: {err}");
                    return;
                }
            }
        }
        ReversePath::Shared { .. } => None,
    };

    let is_dir = tokio::fs::metadata(&real)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    // Writes landing on a locked path did not come through the lock-aware
    // web flow, so somebody bypassed the advisory lock (SMB cannot be
    // blocked at this layer).
    if op != FsOp::Create {
        if let Ok(Some(lock)) = ctx.locks.get(&canonical).await {
            ctx.audit
                .record(
                    NewAuditEvent::new(event::SECURITY_LOCK_BYPASSED, &canonical).details(
                        serde_json::json!({
                            "holder": lock.locked_by,
                            "op": op.as_str(),
                        }),
                    ),
                )
                .await;
        }
    }

    let change = ChangeEvent {
        op,
        path: canonical.clone(),
        is_dir,
        owner,
        actor: None,
        ts: Utc::now(),
    };
    ctx.hub.publish(&change).await;

    // Attribution is deferred to the SMB correlator, which either joins
    // this with a log record or flushes it as unattributed.
    ctx.correlator.note_unattributed(PendingChange {
        op,
        real,
        canonical,
        ts: change.ts,
    });
}

/// Maps one OS notification to zero or more `(op, path)` pairs.
fn classify(event: &notify::Event) -> Vec<(FsOp, PathBuf)> {
    let op = match &event.kind {
        EventKind::Create(_) => FsOp::Create,
        EventKind::Remove(_) => FsOp::Remove,
        EventKind::Modify(ModifyKind::Name(mode)) => {
            return match mode {
                RenameMode::Both if event.paths.len() == 2 => vec![
                    (FsOp::Remove, event.paths[0].clone()),
                    (FsOp::Rename, event.paths[1].clone()),
                ],
                RenameMode::From => {
                    event.paths.iter().map(|p| (FsOp::Remove, p.clone())).collect()
                }
                _ => event.paths.iter().map(|p| (FsOp::Rename, p.clone())).collect(),
            };
        }
        EventKind::Modify(_) => FsOp::Write,
        _ => return Vec::new(),
    };
    event.paths.iter().map(|p| (op, p.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclEngine;
    use crate::database::memory::MemoryDb;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use skiff_model::User;

    #[test]
    fn classification_covers_the_basic_kinds() {
        let path = PathBuf::from("/data/users/alice/a.txt");

        let create = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(path.clone());
        assert_eq!(classify(&create), vec![(FsOp::Create, path.clone())]);

        let write = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any)))
            .add_path(path.clone());
        assert_eq!(classify(&write), vec![(FsOp::Write, path.clone())]);

        let remove = notify::Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(path.clone());
        assert_eq!(classify(&remove), vec![(FsOp::Remove, path.clone())]);

        let rename = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/data/users/alice/old"))
            .add_path(PathBuf::from("/data/users/alice/new"));
        let classified = classify(&rename);
        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].0, FsOp::Remove);
        assert_eq!(classified[1].0, FsOp::Rename);
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let queue = EventQueue {
            inner: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            drops: AtomicU64::new(0),
        };
        for i in 0..(QUEUE_CAPACITY + 5) {
            queue.push(
                notify::Event::new(EventKind::Create(CreateKind::File))
                    .add_path(PathBuf::from(format!("/f{i}"))),
            );
        }
        assert_eq!(queue.drops.load(Ordering::Relaxed), 5);
        assert_eq!(queue.inner.lock().len(), QUEUE_CAPACITY);
        // The oldest five are gone.
        assert_eq!(
            queue.pop().unwrap().paths[0],
            PathBuf::from("/f5")
        );
    }

    #[tokio::test]
    async fn end_to_end_create_reaches_subscribers() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = Arc::new(PathResolver::new(tmp.path()));
        let db = MemoryDb::new();
        let alice = User {
            id: UserId::new(),
            username: "alice".to_string(),
            email: None,
            is_admin: false,
            is_active: true,
            storage_quota: 0,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.users.create(&alice, None).await.unwrap();

        let audit = Arc::new(AuditRecorder::new(db.audit.clone()));
        let acl = Arc::new(AclEngine::new(db.drives.clone(), db.acl.clone()));
        let hub = Arc::new(EventHub::new(acl));
        let correlator = Arc::new(SmbCorrelator::new(
            db.users.clone(),
            audit.clone(),
            None,
            tmp.path().join("offset"),
        ));
        std::fs::create_dir_all(resolver.home_dir("alice")).unwrap();

        let watcher = TreeWatcher::spawn(WatchContext {
            resolver: resolver.clone(),
            hub: hub.clone(),
            audit,
            locks: db.locks.clone(),
            users: db.users.clone(),
            correlator,
            web_origin: Arc::new(TtlSet::new()),
        })
        .unwrap();

        let mut sub = hub.subscribe(alice.clone(), vec![]);
        std::fs::write(resolver.home_dir("alice").join("fresh.txt"), b"hi").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), sub.rx.recv())
            .await
            .expect("watcher should deliver within five seconds")
            .expect("channel open");
        assert_eq!(received.path, "/home/fresh.txt");
        assert_eq!(received.owner, Some(alice.id));
        assert!(received.actor.is_none());

        watcher.shutdown();
    }
}
