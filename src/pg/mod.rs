//! Local PostgreSQL adapter
//!
//! Wraps the co-located PostgreSQL instance behind the [`Cluster`] trait:
//! probe queries over a lazy connection, `pg_ctl` stop/start, trigger-file
//! promotion, and `pg_basebackup` re-sync. Stateless with respect to the
//! control plane; the sentinel owns all role decisions.

mod cluster;

use async_trait::async_trait;

pub use cluster::PgCluster;

use crate::error::Result;
use crate::hostinfo::HostInfo;

/// Control-plane view of the local PostgreSQL instance.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Server version as (major, minor).
    async fn version(&self) -> Result<(u32, u32)>;

    /// True iff a trivial probe query succeeds.
    async fn alive(&self) -> Result<bool>;

    /// PostgreSQL's `pg_is_in_recovery()`.
    async fn in_recovery(&self) -> Result<bool>;

    /// Upstream this replica is streaming from, or `None` when not streaming.
    async fn master_info(&self) -> Result<Option<HostInfo>>;

    /// Stop the instance via `pg_ctl`. Synchronous.
    async fn stop(&self) -> Result<()>;

    /// Start the instance via `pg_ctl`. Synchronous.
    async fn start(&self) -> Result<()>;

    /// Promote a replica: create the trigger file, then wait for recovery to
    /// end. Fails fast with [`crate::Error::NotInRecovery`] on a master and
    /// with [`crate::Error::PromotionTimeout`] when recovery does not end in
    /// time.
    async fn promote(&self) -> Result<()>;

    /// Re-seed the data directory from `host:port` with `pg_basebackup`,
    /// moving the current data directory aside first. The caller stops the
    /// instance before and starts it after.
    async fn backup(&self, host: &str, port: u16) -> Result<()>;
}
