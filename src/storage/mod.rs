//! Coordination storage layer
//!
//! Agents arbitrate the master role through a shared, strongly-consistent
//! coordination service exposing two primitives:
//! - a named distributed mutex with a TTL-bound lease (ownership = master role)
//! - a small byte-keyed dictionary (the `master-info` pointer)
//!
//! Two back-ends satisfy the contract; the sentinel is agnostic to which one
//! is in use.

mod etcd;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Name of the mutex whose ownership implies the master role.
pub const MUTEX_NAME: &str = "pg";

/// Dictionary key holding the serialized [`crate::HostInfo`] of the current master.
pub const KEY_MASTER_INFO: &[u8] = b"master-info";

/// Per-operation timeout applied by the back-ends.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout for the initial dial to the coordination service.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default mutex lease TTL.
pub const DEFAULT_TTL: Duration = Duration::from_millis(5000);

/// Coordination storage contract.
///
/// All operations are bounded by [`DEFAULT_OP_TIMEOUT`] internally. A lock
/// attempt that runs out of time reports `Ok(false)`, never an error; an
/// absent dictionary key reports `Ok(None)`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Attempt to acquire the master mutex within the op timeout.
    ///
    /// On acquisition the lease is refreshed automatically until
    /// [`Storage::mutex_unlock`] or session loss.
    async fn mutex_try_lock(&self) -> Result<bool>;

    /// Release the lease held by this session. Unlocking a mutex this
    /// session does not hold is an error.
    async fn mutex_unlock(&self) -> Result<()>;

    /// Last-writer-wins put.
    async fn dictionary_put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Read a key; absent key is `Ok(None)`.
    async fn dictionary_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key; removing a missing key is not an error.
    async fn dictionary_remove(&self, key: &[u8]) -> Result<()>;
}

/// Storage back-end kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    Etcd,
    #[default]
    Redis,
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(Self::Etcd),
            "redis" => Ok(Self::Redis),
            _ => Err(format!("unknown storage type: {}", s)),
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Etcd => write!(f, "etcd"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Connect to the configured back-end.
///
/// `bootstrap` is a comma-separated endpoint list; `ttl` is the mutex lease
/// TTL; `shutdown` stops lease keep-alive tasks and closes the session.
pub async fn connect(
    kind: StorageKind,
    bootstrap: &str,
    ttl: Duration,
    shutdown: CancellationToken,
) -> Result<Arc<dyn Storage>> {
    match kind {
        StorageKind::Etcd => {
            let storage = etcd::EtcdStorage::connect(bootstrap, ttl, shutdown).await?;
            Ok(Arc::new(storage))
        }
        StorageKind::Redis => {
            let storage = redis::RedisStorage::connect(bootstrap, ttl, shutdown).await?;
            Ok(Arc::new(storage))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!("etcd".parse::<StorageKind>().unwrap(), StorageKind::Etcd);
        assert_eq!("Redis".parse::<StorageKind>().unwrap(), StorageKind::Redis);
        assert!("consul".parse::<StorageKind>().is_err());
    }

    #[test]
    fn test_default_kind() {
        assert_eq!(StorageKind::default(), StorageKind::Redis);
        assert_eq!(StorageKind::Redis.to_string(), "redis");
    }
}
