//! Agent configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::StorageKind;

/// Default PostgreSQL connection settings
pub const DEFAULT_PG_HOST: &str = "localhost";
pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_PG_DATABASE: &str = "postgres";
pub const DEFAULT_PG_USER: &str = "postgres";

/// Default HTTP gateway settings
pub const DEFAULT_HTTP_PORT: u16 = 3501;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // --- PostgreSQL ---
    /// Host the local PostgreSQL listens on (default: localhost)
    pub pg_host: String,
    /// Port the local PostgreSQL listens on (default: 5432)
    pub pg_port: u16,
    /// Database used for probe queries (default: postgres)
    pub pg_database: String,
    /// Superuser for probe queries (default: postgres)
    pub pg_user: String,
    /// File holding the superuser password, one line
    pub pg_password_file: Option<PathBuf>,
    /// PostgreSQL data directory (PGDATA)
    pub pg_data_dir: PathBuf,
    /// Directory holding pg_ctl / pg_basebackup
    pub pg_bin_dir: PathBuf,
    /// Directory receiving moved-aside data directories during re-sync
    pub pg_backup_root: PathBuf,
    /// Replication user passed to pg_basebackup
    pub pg_replication_user: String,

    // --- Coordination storage ---
    /// Storage back-end kind (default: redis)
    pub storage_kind: StorageKind,
    /// Comma-separated storage endpoints
    pub storage_bootstrap: String,
    /// Mutex lease TTL (default: 5000 ms)
    pub storage_ttl: Duration,

    // --- HTTP gateway ---
    /// Gateway port (default: 3501)
    pub http_port: u16,
    /// Gateway bind address (default: 0.0.0.0)
    pub listen_addr: String,
    /// Expose /metrics (default: true)
    pub metrics_enabled: bool,

    // --- Agent ---
    /// Log level (trace, debug, info, warn, error, off)
    pub log_level: String,
    /// Log file path, empty for stderr
    pub log_file: String,
    /// Sentinel check interval (default: 1 s)
    pub check_interval: Duration,
    /// Hostname advertised to peers; discovered from HOSTNAME when unset
    pub hostname: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pg_host: DEFAULT_PG_HOST.to_string(),
            pg_port: DEFAULT_PG_PORT,
            pg_database: DEFAULT_PG_DATABASE.to_string(),
            pg_user: DEFAULT_PG_USER.to_string(),
            pg_password_file: None,
            pg_data_dir: PathBuf::from("/var/lib/postgresql/data"),
            pg_bin_dir: PathBuf::from("/usr/lib/postgresql/bin"),
            pg_backup_root: PathBuf::from("/var/lib/postgresql/backup"),
            pg_replication_user: "replicator".to_string(),
            storage_kind: StorageKind::default(),
            storage_bootstrap: String::new(),
            storage_ttl: crate::storage::DEFAULT_TTL,
            http_port: DEFAULT_HTTP_PORT,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            metrics_enabled: true,
            log_level: "info".to_string(),
            log_file: String::new(),
            check_interval: Duration::from_secs(1),
            hostname: None,
        }
    }
}

impl AgentConfig {
    /// Validate the configuration, rejecting values the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage_bootstrap.trim().is_empty() {
            return Err(Error::Config(
                "storage bootstrap endpoints must not be empty".to_string(),
            ));
        }
        if self.http_port == 0 {
            return Err(Error::Config("http port must be > 0".to_string()));
        }
        if self.pg_port == 0 {
            return Err(Error::Config("postgres port must be > 0".to_string()));
        }
        if self.check_interval.is_zero() {
            return Err(Error::Config("check interval must be > 0".to_string()));
        }
        if self.storage_ttl < Duration::from_millis(1000) {
            return Err(Error::Config(
                "storage ttl must be at least 1000 ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Hostname advertised in `master-info`: explicit override, then the
    /// HOSTNAME environment variable, then localhost.
    pub fn self_hostname(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            storage_bootstrap: "127.0.0.1:2379".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.pg_port, 5432);
        assert_eq!(config.http_port, 3501);
        assert_eq!(config.storage_ttl, Duration::from_millis(5000));
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_validate_requires_bootstrap() {
        let config = AgentConfig::default();
        assert!(config.validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_ttl() {
        let config = AgentConfig {
            storage_ttl: Duration::from_millis(100),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hostname_override() {
        let config = AgentConfig {
            hostname: Some("pg-7".to_string()),
            ..valid_config()
        };
        assert_eq!(config.self_hostname(), "pg-7");
    }
}
