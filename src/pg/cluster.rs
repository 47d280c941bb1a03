//! PostgreSQL control adapter implementation.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_postgres::{Client, NoTls};

use super::Cluster;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::hostinfo::HostInfo;

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PROMOTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the promotion trigger file created inside the data directory.
const PROMOTE_TRIGGER_FILE: &str = "promote.signal";

/// Delay between recovery-status polls while a promotion is in flight.
const PROMOTE_POLL_DELAY: Duration = Duration::from_secs(1);

/// [`Cluster`] backed by the co-located PostgreSQL instance.
///
/// Probe queries share one lazy connection; any query error drops it so the
/// next probe re-dials. Stop/start/backup shell out to the PostgreSQL
/// binaries.
pub struct PgCluster {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: String,

    data_dir: PathBuf,
    bin_dir: PathBuf,
    backup_root: PathBuf,
    replication_user: String,

    connection_timeout: Duration,
    promotion_timeout: Duration,

    client: Mutex<Option<Client>>,
}

impl PgCluster {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let password = match &config.pg_password_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read password file {:?}: {}", path, e))
                })?;
                contents
                    .lines()
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| Error::Config(format!("password file {:?} is empty", path)))?
            }
            None => String::new(),
        };

        Ok(Self {
            host: config.pg_host.clone(),
            port: config.pg_port,
            database: config.pg_database.clone(),
            user: config.pg_user.clone(),
            password,
            data_dir: config.pg_data_dir.clone(),
            bin_dir: config.pg_bin_dir.clone(),
            backup_root: config.pg_backup_root.clone(),
            replication_user: config.pg_replication_user.clone(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            promotion_timeout: DEFAULT_PROMOTION_TIMEOUT,
            client: Mutex::new(None),
        })
    }

    /// Dial until connected or the connection timeout elapses. The first
    /// attempt is immediate; failures retry once a second.
    async fn connect(&self) -> Result<Client> {
        let conn_str = format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.database
        );

        let dial = async {
            loop {
                match tokio_postgres::connect(&conn_str, NoTls).await {
                    Ok((client, connection)) => {
                        tokio::spawn(async move {
                            if let Err(e) = connection.await {
                                log::debug!("connection task ended: {}", e);
                            }
                        });
                        log::debug!("connection established");
                        return client;
                    }
                    Err(e) => {
                        log::debug!("connection attempt failed: {}", e);
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        };

        timeout(self.connection_timeout, dial)
            .await
            .map_err(|_| Error::ConnectionTimeout)
    }

    async fn query_one(&self, sql: &str) -> Result<tokio_postgres::Row> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_ref() else {
            return Err(Error::Postgres("no connection".to_string()));
        };
        match client.query_one(sql, &[]).await {
            Ok(row) => Ok(row),
            Err(e) => {
                log::error!("probe error: {}", e);
                *guard = None;
                Err(e.into())
            }
        }
    }

    async fn query_opt(&self, sql: &str) -> Result<Option<tokio_postgres::Row>> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_ref() else {
            return Err(Error::Postgres("no connection".to_string()));
        };
        match client.query_opt(sql, &[]).await {
            Ok(row) => Ok(row),
            Err(e) => {
                log::error!("probe error: {}", e);
                *guard = None;
                Err(e.into())
            }
        }
    }

    async fn pg_ctl(&self, action: &str) -> Result<()> {
        let status = Command::new(self.bin_dir.join("pg_ctl"))
            .arg(action)
            .arg("-D")
            .arg(&self.data_dir)
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Command(format!("pg_ctl {}: {}", action, status)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Cluster for PgCluster {
    async fn version(&self) -> Result<(u32, u32)> {
        let row = self.query_one("SELECT version()").await?;
        parse_version(row.get(0))
    }

    async fn alive(&self) -> Result<bool> {
        let row = self.query_one("SELECT true").await?;
        Ok(row.get(0))
    }

    async fn in_recovery(&self) -> Result<bool> {
        let row = self.query_one("SELECT pg_is_in_recovery()").await?;
        Ok(row.get(0))
    }

    async fn master_info(&self) -> Result<Option<HostInfo>> {
        let row = self
            .query_opt("SELECT sender_host, sender_port FROM pg_stat_wal_receiver")
            .await?;
        Ok(row.map(|row| {
            let host: String = row.get(0);
            let port: i32 = row.get(1);
            HostInfo::new(host, port as u16)
        }))
    }

    async fn stop(&self) -> Result<()> {
        log::warn!("stopping cluster");
        self.pg_ctl("stop").await
    }

    async fn start(&self) -> Result<()> {
        log::warn!("starting cluster");
        self.pg_ctl("start").await
    }

    async fn promote(&self) -> Result<()> {
        if !self.in_recovery().await? {
            return Err(Error::NotInRecovery);
        }

        let trigger = self.data_dir.join(PROMOTE_TRIGGER_FILE);
        log::debug!("creating trigger {}", trigger.display());
        tokio::fs::File::create(&trigger).await?;

        let wait = async {
            loop {
                if !self.in_recovery().await? {
                    return Ok(());
                }
                sleep(PROMOTE_POLL_DELAY).await;
            }
        };
        match timeout(self.promotion_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::PromotionTimeout),
        }
    }

    async fn backup(&self, host: &str, port: u16) -> Result<()> {
        log::warn!("backup from {}:{}", host, port);
        log::debug!("replication user: {}", self.replication_user);

        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        let backup_dir = self.backup_root.join(stamp);
        log::debug!(
            "moving {} aside to {}",
            self.data_dir.display(),
            backup_dir.display()
        );
        // The moved-aside directory is the only copy kept; it is not restored
        // when pg_basebackup fails.
        tokio::fs::rename(&self.data_dir, &backup_dir).await?;

        let status = Command::new(self.bin_dir.join("pg_basebackup"))
            .args(["-h", host, "-p", &port.to_string(), "-U"])
            .arg(&self.replication_user)
            .arg("-D")
            .arg(&self.data_dir)
            .args(["-P", "-R", "-v"])
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Command(format!("pg_basebackup: {}", status)));
        }
        Ok(())
    }
}

/// Parse "PostgreSQL <major>.<minor> ..." from `SELECT version()`.
fn parse_version(banner: &str) -> Result<(u32, u32)> {
    let rest = banner
        .strip_prefix("PostgreSQL ")
        .ok_or_else(|| Error::Postgres(format!("unexpected version banner: {}", banner)))?;
    let version = rest.split_whitespace().next().unwrap_or("");
    let mut parts = version.splitn(2, '.');
    let major = leading_number(parts.next().unwrap_or(""))
        .ok_or_else(|| Error::Postgres(format!("unexpected version banner: {}", banner)))?;
    let minor = parts.next().and_then(leading_number).unwrap_or(0);
    Ok((major, minor))
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        let banner = "PostgreSQL 16.2 (Debian 16.2-1.pgdg120+2) on x86_64-pc-linux-gnu";
        assert_eq!(parse_version(banner).unwrap(), (16, 2));
    }

    #[test]
    fn test_parse_version_devel() {
        assert_eq!(parse_version("PostgreSQL 17devel on x86_64").unwrap().0, 17);
    }

    #[test]
    fn test_parse_version_rejects_foreign_banner() {
        assert!(parse_version("MariaDB 11.4").is_err());
    }
}
