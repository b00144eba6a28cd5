//! SMB audit-log correlation.
//!
//! The SMB daemon appends one record per operation to a text log. This
//! component tails that log with an on-disk offset checkpoint, parses
//! records tolerantly, maps SMB usernames to accounts, and joins records
//! with unattributed watcher events seen within two seconds of each other.
//! Joined pairs audit once as `smb.*`; leftovers on either side are
//! recorded independently.
//!
//! Expected record shape, one per line:
//! `<rfc3339 ts>|<smb username>|<client ip>|<op>|<absolute path>`

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use regex::Regex;
use skiff_model::{audit::event, FsOp, NewAuditEvent, UserId};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::audit::AuditRecorder;
use crate::database::ports::UsersRepository;
use crate::error::Result;

/// Join window between a watcher event and an SMB record for the same path.
const MERGE_WINDOW: Duration = Duration::seconds(2);

/// A watcher event still waiting for attribution.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub op: FsOp,
    pub real: PathBuf,
    pub canonical: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct SmbRecord {
    ts: DateTime<Utc>,
    username: String,
    client_ip: Option<String>,
    op: FsOp,
    path: PathBuf,
}

pub struct SmbCorrelator {
    users: Arc<dyn UsersRepository>,
    audit: Arc<AuditRecorder>,
    log_path: Option<PathBuf>,
    checkpoint_path: PathBuf,
    pending: Mutex<VecDeque<PendingChange>>,
    malformed: AtomicU64,
    line_re: Regex,
}

impl std::fmt::Debug for SmbCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbCorrelator")
            .field("log_path", &self.log_path)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl SmbCorrelator {
    pub fn new(
        users: Arc<dyn UsersRepository>,
        audit: Arc<AuditRecorder>,
        log_path: Option<PathBuf>,
        checkpoint_path: PathBuf,
    ) -> Self {
        Self {
            users,
            audit,
            log_path,
            checkpoint_path,
            pending: Mutex::new(VecDeque::new()),
            malformed: AtomicU64::new(0),
            line_re: Regex::new(r"^([^|]+)\|([^|]+)\|([^|]*)\|([a-z_]+)\|(.+)$")
                .expect("static regex"),
        }
    }

    /// Lines skipped as unparsable since startup.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Called by the watcher for events it could not attribute to a web
    /// session.
    pub fn note_unattributed(&self, change: PendingChange) {
        let mut pending = self.pending.lock();
        pending.push_back(change);
        // Backstop against an absent SMB log feed.
        while pending.len() > 4096 {
            pending.pop_front();
        }
    }

    /// Tails the log from the last checkpoint and merges new records.
    /// Returns the number of records processed. Runs every 30 s and on
    /// demand from the admin surface.
    pub async fn sync(&self) -> Result<u64> {
        let Some(log_path) = &self.log_path else {
            return Ok(0);
        };
        let content = match fs::read(log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut offset = self.read_checkpoint().await;
        if offset > content.len() as u64 {
            info!("SMB log shrank below checkpoint, assuming rotation");
            offset = 0;
        }
        let tail = &content[offset as usize..];
        // Only consume complete lines; a partially-written last line stays
        // for the next pass.
        let consumed = match tail.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => last_newline + 1,
            None => return Ok(0),
        };

        let mut processed = 0u64;
        for line in String::from_utf8_lossy(&tail[..consumed]).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.parse_line(line) {
                Some(record) => {
                    self.ingest(record).await;
                    processed += 1;
                }
                None => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    debug!("skipping malformed SMB record: {line}");
                }
            }
        }

        self.write_checkpoint(offset + consumed as u64).await?;
        Ok(processed)
    }

    fn parse_line(&self, line: &str) -> Option<SmbRecord> {
        let captures = self.line_re.captures(line)?;
        let ts = DateTime::parse_from_rfc3339(captures.get(1)?.as_str())
            .ok()?
            .with_timezone(&Utc);
        let op = match captures.get(4)?.as_str() {
            "create" | "mkdir" => FsOp::Create,
            "write" | "pwrite" | "modify" => FsOp::Write,
            "delete" | "unlink" | "rmdir" | "remove" => FsOp::Remove,
            "rename" | "mv" => FsOp::Rename,
            _ => return None,
        };
        let ip = captures.get(3)?.as_str();
        Some(SmbRecord {
            ts,
            username: captures.get(2)?.as_str().to_string(),
            client_ip: if ip.is_empty() { None } else { Some(ip.to_string()) },
            op,
            path: PathBuf::from(captures.get(5)?.as_str()),
        })
    }

    async fn ingest(&self, record: SmbRecord) {
        let actor: Option<UserId> = match self.users.get_by_username(&record.username).await {
            Ok(Some(user)) => Some(user.id),
            Ok(None) => {
                warn!("SMB record for unknown account: {}", record.username);
                None
            }
            Err(err) => {
                warn!("identity lookup failed for SMB record: {err}");
                None
            }
        };

        // Join with a pending watcher event on the same path within the
        // window; the joined pair audits once.
        let joined = {
            let mut pending = self.pending.lock();
            let matched = pending.iter().position(|change| {
                change.real == record.path && (change.ts - record.ts).abs() <= MERGE_WINDOW
            });
            matched.and_then(|idx| pending.remove(idx))
        };

        let target = joined
            .as_ref()
            .map(|change| change.canonical.clone())
            .unwrap_or_else(|| record.path.to_string_lossy().into_owned());

        let mut audit_event = NewAuditEvent::new(smb_event_type(record.op), target)
            .ip(record.client_ip.clone())
            .details(serde_json::json!({
                "smb_username": record.username,
                "merged": joined.is_some(),
            }));
        if let Some(actor) = actor {
            audit_event = audit_event.actor(actor);
        }
        self.audit.record(audit_event).await;
    }

    /// Audits watcher events that never found an SMB record, then drops
    /// them. Entries younger than `max_age` are kept for the next pass.
    pub async fn flush_stale(&self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<PendingChange> = {
            let mut pending = self.pending.lock();
            let mut stale = Vec::new();
            while pending.front().is_some_and(|c| c.ts < cutoff) {
                if let Some(change) = pending.pop_front() {
                    stale.push(change);
                }
            }
            stale
        };
        for change in stale {
            self.audit
                .record(
                    NewAuditEvent::new(event::FILE_CHANGED, &change.canonical).details(
                        serde_json::json!({
                            "op": change.op.as_str(),
                            "attributed": false,
                        }),
                    ),
                )
                .await;
        }
    }

    async fn read_checkpoint(&self) -> u64 {
        match fs::read_to_string(&self.checkpoint_path).await {
            Ok(content) => content.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    async fn write_checkpoint(&self, offset: u64) -> Result<()> {
        if let Some(parent) = self.checkpoint_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.checkpoint_path, offset.to_string()).await?;
        Ok(())
    }
}

fn smb_event_type(op: FsOp) -> &'static str {
    match op {
        FsOp::Create => event::SMB_CREATE,
        FsOp::Write => event::SMB_WRITE,
        FsOp::Remove => event::SMB_DELETE,
        FsOp::Rename => event::SMB_RENAME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;
    use chrono::Utc;
    use skiff_model::User;

    fn alice() -> User {
        User {
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
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        db: MemoryDb,
        correlator: SmbCorrelator,
        log: PathBuf,
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("smb_audit.log");
        let db = MemoryDb::new();
        db.users.create(&alice(), None).await.unwrap();
        let correlator = SmbCorrelator::new(
            db.users.clone(),
            Arc::new(AuditRecorder::new(db.audit.clone())),
            Some(log.clone()),
            tmp.path().join("smb_audit.offset"),
        );
        Fixture {
            _tmp: tmp,
            db,
            correlator,
            log,
        }
    }

    fn line(ts: DateTime<Utc>, user: &str, op: &str, path: &str) -> String {
        format!("{}|{user}|192.0.2.7|{op}|{path}\n", ts.to_rfc3339())
    }

    #[tokio::test]
    async fn record_joins_pending_watcher_event() {
        let f = fixture().await;
        let now = Utc::now();

        f.correlator.note_unattributed(PendingChange {
            op: FsOp::Write,
            real: PathBuf::from("/data/shared/team/spec.md"),
            canonical: "/shared/team/spec.md".to_string(),
            ts: now,
        });
        std::fs::write(&f.log, line(now, "alice", "write", "/data/shared/team/spec.md"))
            .unwrap();

        assert_eq!(f.correlator.sync().await.unwrap(), 1);
        let events = f.db.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event::SMB_WRITE);
        assert_eq!(events[0].target, "/shared/team/spec.md");
        assert!(events[0].actor_id.is_some());
        assert_eq!(events[0].details["merged"], serde_json::json!(true));

        // The pending entry was consumed; nothing left to flush.
        f.correlator.flush_stale(Duration::seconds(0)).await;
        assert_eq!(f.db.audit.events().len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_prevents_reingestion() {
        let f = fixture().await;
        let now = Utc::now();
        std::fs::write(&f.log, line(now, "alice", "create", "/data/shared/team/a")).unwrap();

        assert_eq!(f.correlator.sync().await.unwrap(), 1);
        assert_eq!(f.correlator.sync().await.unwrap(), 0);

        // Appending yields exactly the new record.
        let mut content = std::fs::read(&f.log).unwrap();
        content.extend_from_slice(line(now, "alice", "unlink", "/data/shared/team/a").as_bytes());
        std::fs::write(&f.log, content).unwrap();
        assert_eq!(f.correlator.sync().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_lines_are_counted_and_skipped() {
        let f = fixture().await;
        let now = Utc::now();
        let mut content = String::from("garbage line\n");
        content.push_str("also|not|enough\n");
        content.push_str(&line(now, "alice", "write", "/data/shared/team/x"));
        std::fs::write(&f.log, content).unwrap();

        assert_eq!(f.correlator.sync().await.unwrap(), 1);
        assert_eq!(f.correlator.malformed_count(), 2);
    }

    #[tokio::test]
    async fn unmatched_watcher_event_flushes_unattributed() {
        let f = fixture().await;
        f.correlator.note_unattributed(PendingChange {
            op: FsOp::Remove,
            real: PathBuf::from("/data/users/alice/gone.txt"),
            canonical: "/home/gone.txt".to_string(),
            ts: Utc::now() - Duration::seconds(120),
        });
        f.correlator.flush_stale(Duration::seconds(60)).await;

        let events = f.db.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event::FILE_CHANGED);
        assert_eq!(events[0].details["attributed"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn unknown_smb_user_recorded_without_actor() {
        let f = fixture().await;
        std::fs::write(&f.log, line(Utc::now(), "ghost", "write", "/data/shared/t/x")).unwrap();
        assert_eq!(f.correlator.sync().await.unwrap(), 1);
        let events = f.db.audit.events();
        assert!(events[0].actor_id.is_none());
    }
}
