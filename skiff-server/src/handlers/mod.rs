pub mod annotations;
pub mod drives;
pub mod file_shares;
pub mod files;
pub mod notifications;
pub mod share_access;
pub mod shares;
pub mod trash;
pub mod upload;
pub mod ws;
pub mod zip_download;
