//! Repository ports for the metadata store. Postgres implementations live
//! in [`crate::database::postgres`]; tests substitute in-memory fakes.

pub mod acl;
pub mod annotations;
pub mod audit;
pub mod drives;
pub mod file_shares;
pub mod locks;
pub mod notifications;
pub mod settings;
pub mod shares;
pub mod users;

pub use acl::AclRepository;
pub use annotations::AnnotationsRepository;
pub use audit::AuditRepository;
pub use drives::DrivesRepository;
pub use file_shares::FileSharesRepository;
pub use locks::LocksRepository;
pub use notifications::NotificationsRepository;
pub use settings::SettingsRepository;
pub use shares::SharesRepository;
pub use users::UsersRepository;
