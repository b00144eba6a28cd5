//! Server configuration: defaults, overridden by a TOML file, overridden
//! by environment variables, overridden by CLI flags.

pub mod sources;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use sources::{EnvConfig, FileConfig};

#[derive(Debug, Parser)]
#[command(name = "skiff-server", about = "Self-hosted file-hosting server")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "SKIFF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory of the hosted tree.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
}

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_root: PathBuf,
    pub database_url: String,
    pub jwt_secret: String,
    pub cors_allowed_origins: Vec<String>,
    pub external_url: Option<String>,
    pub smb_audit_log: Option<PathBuf>,
}

impl ServerConfig {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        let env = EnvConfig::from_env();

        let database_url = env
            .database_url
            .or(file.database.url)
            .context("DATABASE_URL is not set")?;

        let jwt_secret = env
            .jwt_secret
            .or(file.auth.jwt_secret)
            .context("JWT_SECRET is not set")?;
        if jwt_secret.len() < 32 {
            warn!("JWT_SECRET is shorter than 32 bytes; use a longer random value");
        }

        Ok(Self {
            host: file.server.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: cli
                .port
                .or(env.port)
                .or(file.server.port)
                .unwrap_or(8080),
            data_root: cli
                .data_root
                .clone()
                .or(env.data_root)
                .or(file.storage.data_root)
                .unwrap_or_else(|| PathBuf::from("/data")),
            database_url,
            jwt_secret,
            cors_allowed_origins: env
                .cors_allowed_origins
                .or(file.cors.allowed_origins)
                .unwrap_or_default(),
            external_url: env.external_url.or(file.server.external_url),
            smb_audit_log: env.smb_audit_log.or(file.smb.audit_log),
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_parses_partial_toml() {
        let raw = r#"
            [server]
            port = 9090

            [storage]
            data_root = "/srv/skiff"

            [smb]
            audit_log = "/var/log/samba/audit.log"
        "#;
        let parsed: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(parsed.server.port, Some(9090));
        assert_eq!(parsed.storage.data_root, Some(PathBuf::from("/srv/skiff")));
        assert!(parsed.database.url.is_none());
        assert_eq!(
            parsed.smb.audit_log,
            Some(PathBuf::from("/var/log/samba/audit.log"))
        );
    }
}
