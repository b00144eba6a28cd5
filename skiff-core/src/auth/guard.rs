//! Login brute-force protection over two keyspaces: per-account counters
//! persisted on the user row, and a per-source-address sliding window kept
//! in memory. Locked principals receive constant-time denials so the
//! lockout itself leaks nothing about password correctness.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use skiff_model::{audit::event, NewAuditEvent, Settings, User, UserId};
use tracing::warn;

use crate::audit::AuditRecorder;
use crate::database::ports::users::LoginState;
use crate::database::ports::UsersRepository;
use crate::error::{Error, Result};
use crate::settings::SettingsCache;

#[derive(Debug, Default)]
struct IpWindow {
    attempts: VecDeque<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

pub struct LoginGuard {
    users: Arc<dyn UsersRepository>,
    audit: Arc<AuditRecorder>,
    settings: Arc<SettingsCache>,
    by_ip: DashMap<String, IpWindow>,
}

impl std::fmt::Debug for LoginGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGuard")
            .field("tracked_addresses", &self.by_ip.len())
            .finish()
    }
}

impl LoginGuard {
    pub fn new(
        users: Arc<dyn UsersRepository>,
        audit: Arc<AuditRecorder>,
        settings: Arc<SettingsCache>,
    ) -> Self {
        Self {
            users,
            audit,
            settings,
            by_ip: DashMap::new(),
        }
    }

    /// Checks the source address before any credential work. Returns
    /// `ip-locked` while the address is locked out.
    pub async fn preflight(&self, ip: Option<&str>) -> Result<()> {
        let settings = self.settings.current().await;
        if !settings.bruteforce_enabled {
            return Ok(());
        }
        let Some(ip) = ip else {
            return Ok(());
        };
        if let Some(window) = self.by_ip.get(ip) {
            if window.locked_until.is_some_and(|until| until > Utc::now()) {
                return Err(Error::IpLocked);
            }
        }
        Ok(())
    }

    /// Whether the account itself is locked out right now.
    pub async fn account_locked(&self, user: &User) -> bool {
        let settings = self.settings.current().await;
        settings.bruteforce_enabled && user.is_locked(Utc::now())
    }

    /// Records a failed attempt against both keyspaces. `user` is `None`
    /// for unknown usernames (only the address is charged then).
    pub async fn on_failure(&self, user: Option<&User>, ip: Option<&str>) -> Result<()> {
        let settings = self.settings.current().await;
        if !settings.bruteforce_enabled {
            return Ok(());
        }
        if let Some(user) = user {
            self.charge_account(user, &settings).await?;
        }
        if let Some(ip) = ip {
            self.charge_ip(ip, &settings).await;
        }
        Ok(())
    }

    async fn charge_account(&self, user: &User, settings: &Settings) -> Result<()> {
        let now = Utc::now();
        let window = Duration::minutes(settings.bruteforce_window_minutes);
        let mut state = self.users.get_login_state(user.id).await?;

        // Attempts outside the window start a fresh count.
        if state
            .last_failed
            .is_none_or(|last| now - last > window)
        {
            state.failed_count = 0;
        }
        state.failed_count += 1;
        state.last_failed = Some(now);

        if i64::from(state.failed_count) >= settings.bruteforce_max_attempts {
            state.locked_until =
                Some(now + Duration::minutes(settings.bruteforce_lock_minutes));
            warn!("account locked after repeated failures: {}", user.username);
            self.audit
                .record(
                    NewAuditEvent::new(event::SECURITY_ACCOUNT_LOCKED, &user.username)
                        .actor(user.id)
                        .details(serde_json::json!({
                            "failed_attempts": state.failed_count,
                            "locked_until": state.locked_until,
                        })),
                )
                .await;
        }
        self.users.set_login_state(user.id, state).await
    }

    async fn charge_ip(&self, ip: &str, settings: &Settings) {
        let now = Utc::now();
        let window = Duration::minutes(settings.bruteforce_window_minutes);
        let mut entry = self.by_ip.entry(ip.to_string()).or_default();
        entry.attempts.push_back(now);
        while entry
            .attempts
            .front()
            .is_some_and(|first| now - *first > window)
        {
            entry.attempts.pop_front();
        }
        if entry.attempts.len() as i64 >= settings.bruteforce_ip_max_attempts
            && entry.locked_until.is_none_or(|until| until <= now)
        {
            entry.locked_until =
                Some(now + Duration::minutes(settings.bruteforce_ip_lock_minutes));
            warn!("source address locked after repeated failures: {ip}");
            self.audit
                .record(NewAuditEvent::new(event::SECURITY_IP_LOCKED, ip))
                .await;
        }
    }

    /// Resets the per-account counters after a successful login.
    pub async fn on_success(&self, user: &User) -> Result<()> {
        self.users
            .set_login_state(user.id, LoginState::default())
            .await
    }

    /// Admin force-unlock of a locked account.
    pub async fn force_unlock(&self, target: UserId, admin: UserId) -> Result<()> {
        self.users
            .set_login_state(target, LoginState::default())
            .await?;
        self.audit
            .record(
                NewAuditEvent::new(event::SECURITY_ACCOUNT_UNLOCKED, target.to_string())
                    .actor(admin),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;

    fn user() -> User {
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

    fn guard(db: &MemoryDb) -> LoginGuard {
        LoginGuard::new(
            db.users.clone(),
            Arc::new(AuditRecorder::new(db.audit.clone())),
            Arc::new(SettingsCache::new(db.settings.clone())),
        )
    }

    #[tokio::test]
    async fn account_locks_after_max_attempts() {
        let db = MemoryDb::new();
        let alice = user();
        db.users.create(&alice, None).await.unwrap();
        let guard = guard(&db);

        for _ in 0..4 {
            guard.on_failure(Some(&alice), None).await.unwrap();
            let current = db.users.get_by_id(alice.id).await.unwrap().unwrap();
            assert!(!guard.account_locked(&current).await);
        }
        // Fifth failure trips the default threshold.
        guard.on_failure(Some(&alice), None).await.unwrap();
        let current = db.users.get_by_id(alice.id).await.unwrap().unwrap();
        assert!(guard.account_locked(&current).await);

        let events = db.audit.events();
        assert!(events
            .iter()
            .any(|e| e.event_type == event::SECURITY_ACCOUNT_LOCKED));
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let db = MemoryDb::new();
        let alice = user();
        db.users.create(&alice, None).await.unwrap();
        let guard = guard(&db);

        for _ in 0..4 {
            guard.on_failure(Some(&alice), None).await.unwrap();
        }
        guard.on_success(&alice).await.unwrap();
        let state = db.users.get_login_state(alice.id).await.unwrap();
        assert_eq!(state.failed_count, 0);

        // The next failure is attempt one of a fresh window.
        guard.on_failure(Some(&alice), None).await.unwrap();
        let current = db.users.get_by_id(alice.id).await.unwrap().unwrap();
        assert!(!guard.account_locked(&current).await);
    }

    #[tokio::test]
    async fn address_lockout_kicks_in() {
        let db = MemoryDb::new();
        let guard = guard(&db);

        for _ in 0..20 {
            guard.on_failure(None, Some("203.0.113.9")).await.unwrap();
        }
        let err = guard.preflight(Some("203.0.113.9")).await.unwrap_err();
        assert_eq!(err.kind(), "ip-locked");
        // Other addresses are unaffected.
        guard.preflight(Some("203.0.113.10")).await.unwrap();
    }

    #[tokio::test]
    async fn force_unlock_clears_the_lock() {
        let db = MemoryDb::new();
        let alice = user();
        db.users.create(&alice, None).await.unwrap();
        let guard = guard(&db);

        for _ in 0..5 {
            guard.on_failure(Some(&alice), None).await.unwrap();
        }
        guard.force_unlock(alice.id, UserId::new()).await.unwrap();
        let current = db.users.get_by_id(alice.id).await.unwrap().unwrap();
        assert!(!guard.account_locked(&current).await);
        assert!(db
            .audit
            .events()
            .iter()
            .any(|e| e.event_type == event::SECURITY_ACCOUNT_UNLOCKED));
    }
}
