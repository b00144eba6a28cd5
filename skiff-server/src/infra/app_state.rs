use std::sync::Arc;

use skiff_core::{
    AclEngine, AuditRecorder, Database, EventHub, LockManager, LoginGuard, PathResolver,
    QuotaAccountant, SettingsCache, ShareService, SmbCorrelator, TrashManager, TtlSet,
    UploadPipeline,
};

use crate::infra::config::ServerConfig;
use crate::users::auth::jwt::JwtKeys;

/// Everything a handler needs, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Database,
    pub resolver: Arc<PathResolver>,
    pub acl: Arc<AclEngine>,
    pub locks: Arc<LockManager>,
    pub quota: Arc<QuotaAccountant>,
    pub uploads: Arc<UploadPipeline>,
    pub trash: Arc<TrashManager>,
    pub shares: Arc<ShareService>,
    pub hub: Arc<EventHub>,
    pub audit: Arc<AuditRecorder>,
    pub guard: Arc<LoginGuard>,
    pub settings: Arc<SettingsCache>,
    pub correlator: Arc<SmbCorrelator>,
    pub web_origin: Arc<TtlSet>,
    pub jwt: Arc<JwtKeys>,
    /// Accounts that passed the password step and may complete 2FA.
    pub pending_2fa: Arc<TtlSet>,
}

impl AppState {
    pub fn build(config: ServerConfig, db: Database) -> Self {
        let resolver = Arc::new(PathResolver::new(config.data_root.clone()));
        let settings = Arc::new(SettingsCache::new(db.settings.clone()));
        let audit = Arc::new(AuditRecorder::new(db.audit.clone()));
        let acl = Arc::new(AclEngine::new(db.drives.clone(), db.acl.clone()));
        let locks = Arc::new(LockManager::new(db.locks.clone()));
        let quota = Arc::new(QuotaAccountant::new(
            db.users.clone(),
            db.drives.clone(),
            audit.clone(),
        ));
        let hub = Arc::new(EventHub::new(acl.clone()));
        let web_origin = Arc::new(TtlSet::new());
        let uploads = Arc::new(UploadPipeline::new(
            resolver.clone(),
            acl.clone(),
            quota.clone(),
            locks.clone(),
            db.drives.clone(),
            audit.clone(),
            hub.clone(),
            web_origin.clone(),
            settings.clone(),
        ));
        let trash = Arc::new(TrashManager::new(
            resolver.clone(),
            acl.clone(),
            quota.clone(),
            db.drives.clone(),
            audit.clone(),
            hub.clone(),
        ));
        let shares = Arc::new(ShareService::new(
            db.shares.clone(),
            db.users.clone(),
            db.notifications.clone(),
            resolver.clone(),
            audit.clone(),
        ));
        let guard = Arc::new(LoginGuard::new(
            db.users.clone(),
            audit.clone(),
            settings.clone(),
        ));
        let correlator = Arc::new(SmbCorrelator::new(
            db.users.clone(),
            audit.clone(),
            config.smb_audit_log.clone(),
            config.data_root.join(".smb-audit.offset"),
        ));
        let jwt = Arc::new(JwtKeys::new(config.jwt_secret.clone()));

        Self {
            config: Arc::new(config),
            db,
            resolver,
            acl,
            locks,
            quota,
            uploads,
            trash,
            shares,
            hub,
            audit,
            guard,
            settings,
            correlator,
            web_origin,
            jwt,
            pending_2fa: Arc::new(TtlSet::new()),
        }
    }
}
