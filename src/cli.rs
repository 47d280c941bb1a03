use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::storage::StorageKind;
use clap::Parser;

use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(name = "pgsentinel")]
#[command(version)]
#[command(about = "Automatic failover agent for PostgreSQL streaming clusters", long_about = None)]
pub struct Cli {
    /// Coordination storage back-end (etcd, redis)
    #[arg(long, env = "PGSN_STORAGE_TYPE")]
    pub storage_type: Option<String>,

    /// Comma-separated coordination storage endpoints
    #[arg(long, env = "PGSN_STORAGE_BOOTSTRAP")]
    pub storage_bootstrap: Option<String>,

    /// Mutex lease TTL in milliseconds (default: 5000)
    #[arg(long, env = "PGSN_STORAGE_TTL_MS")]
    pub storage_ttl_ms: Option<u64>,

    /// HTTP gateway port (default: 3501)
    #[arg(long, env = "PGSN_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// HTTP gateway bind address (default: 0.0.0.0)
    #[arg(long, env = "PGSN_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Expose Prometheus metrics (default: true)
    #[arg(long, env = "PGSN_METRICS_ENABLED")]
    pub metrics_enabled: Option<bool>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, env = "PGSN_LOG_LEVEL")]
    pub loglevel: Option<String>,

    /// Log file path, stderr when unset
    #[arg(long, env = "PGSN_LOG_FILE")]
    pub logfile: Option<String>,

    /// Sentinel check interval in milliseconds (default: 1000)
    #[arg(long, env = "PGSN_CHECK_INTERVAL_MS")]
    pub check_interval_ms: Option<u64>,

    /// Hostname advertised to peers (default: $HOSTNAME)
    #[arg(long, env = "PGSN_HOSTNAME")]
    pub hostname: Option<String>,

    /// Local PostgreSQL host
    #[arg(long, env = "PGSN_PG_HOST")]
    pub pg_host: Option<String>,

    /// Local PostgreSQL port
    #[arg(long, env = "PGSN_PG_PORT")]
    pub pg_port: Option<u16>,

    /// Database used for probe queries
    #[arg(long, env = "PGSN_PG_DATABASE")]
    pub pg_database: Option<String>,

    /// PostgreSQL superuser
    #[arg(long, env = "PG_USER")]
    pub pg_user: Option<String>,

    /// File holding the superuser password
    #[arg(long, env = "PG_PASSWORD_FILE")]
    pub pg_password_file: Option<PathBuf>,

    /// PostgreSQL data directory
    #[arg(long, env = "PGDATA")]
    pub pg_data: Option<PathBuf>,

    /// Directory holding pg_ctl and pg_basebackup
    #[arg(long, env = "PG_BINDIR")]
    pub pg_bindir: Option<PathBuf>,

    /// Directory receiving moved-aside data directories
    #[arg(long, env = "PG_BACKUP")]
    pub pg_backup: Option<PathBuf>,

    /// Replication user passed to pg_basebackup
    #[arg(long, env = "PG_REPLICATION_USER")]
    pub pg_replication_user: Option<String>,
}

impl Cli {
    /// Parse the command line and environment into a validated config.
    pub fn load_config() -> Result<AgentConfig> {
        Cli::parse().into_config()
    }

    /// Merge flags over the defaults, then validate.
    pub fn into_config(self) -> Result<AgentConfig> {
        let mut config = AgentConfig::default();

        if let Some(kind) = self.storage_type {
            config.storage_kind = kind
                .parse::<StorageKind>()
                .map_err(Error::Config)?;
        }
        if let Some(bootstrap) = self.storage_bootstrap {
            config.storage_bootstrap = bootstrap;
        }
        if let Some(ttl) = self.storage_ttl_ms {
            config.storage_ttl = Duration::from_millis(ttl);
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(enabled) = self.metrics_enabled {
            config.metrics_enabled = enabled;
        }
        if let Some(level) = self.loglevel {
            config.log_level = level;
        }
        if let Some(file) = self.logfile {
            config.log_file = file;
        }
        if let Some(interval) = self.check_interval_ms {
            config.check_interval = Duration::from_millis(interval);
        }
        if let Some(hostname) = self.hostname {
            config.hostname = Some(hostname);
        }
        if let Some(host) = self.pg_host {
            config.pg_host = host;
        }
        if let Some(port) = self.pg_port {
            config.pg_port = port;
        }
        if let Some(db) = self.pg_database {
            config.pg_database = db;
        }
        if let Some(user) = self.pg_user {
            config.pg_user = user;
        }
        if let Some(file) = self.pg_password_file {
            config.pg_password_file = Some(file);
        }
        if let Some(dir) = self.pg_data {
            config.pg_data_dir = dir;
        }
        if let Some(dir) = self.pg_bindir {
            config.pg_bin_dir = dir;
        }
        if let Some(dir) = self.pg_backup {
            config.pg_backup_root = dir;
        }
        if let Some(user) = self.pg_replication_user {
            config.pg_replication_user = user;
        }

        config.validate()?;
        Ok(config)
    }
}
