//! etcd coordination back-end
//!
//! One session = one lease. The lease is granted at connect time, refreshed
//! by a background keep-alive task, and revoked on shutdown so the mutex is
//! released promptly instead of waiting out the TTL.

use std::time::Duration;

use etcd_client::{Client, ConnectOptions, LockOptions};
use tokio::sync::Mutex;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_DIAL_TIMEOUT, DEFAULT_OP_TIMEOUT, MUTEX_NAME, Storage};
use crate::error::{Error, Result};

pub struct EtcdStorage {
    client: Client,
    lease_id: i64,
    // lock key returned by etcd while the mutex is held by this session
    lock_key: Mutex<Option<Vec<u8>>>,
}

impl EtcdStorage {
    pub async fn connect(
        bootstrap: &str,
        ttl: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let endpoints: Vec<&str> = bootstrap.split(',').map(str::trim).collect();
        let options = ConnectOptions::new()
            .with_connect_timeout(DEFAULT_DIAL_TIMEOUT)
            .with_timeout(DEFAULT_OP_TIMEOUT);
        let mut client = Client::connect(&endpoints, Some(options)).await?;

        let lease = client.lease_grant(ttl.as_secs().max(1) as i64, None).await?;
        let lease_id = lease.id();
        log::debug!("etcd lease granted: {:x}", lease_id);

        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;

        // Refresh well inside the TTL; revoke the lease on shutdown.
        let mut revoke_client = client.clone();
        tokio::spawn(async move {
            let period = (ttl / 3).max(Duration::from_millis(500));
            let mut tick = interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = revoke_client.lease_revoke(lease_id).await;
                        log::debug!("etcd lease revoked");
                        return;
                    }
                    _ = tick.tick() => {
                        if let Err(e) = keeper.keep_alive().await {
                            log::error!("lease keep-alive error: {}", e);
                            continue;
                        }
                        if let Ok(Some(resp)) = stream.message().await {
                            if resp.ttl() == 0 {
                                log::error!("lease expired: {:x}", lease_id);
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            client,
            lease_id,
            lock_key: Mutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl Storage for EtcdStorage {
    async fn mutex_try_lock(&self) -> Result<bool> {
        log::trace!("trying to lock");
        let mut held = self.lock_key.lock().await;
        if held.is_some() {
            return Ok(true);
        }

        let mut client = self.client.clone();
        let options = LockOptions::new().with_lease(self.lease_id);
        match timeout(DEFAULT_OP_TIMEOUT, client.lock(MUTEX_NAME, Some(options))).await {
            Ok(Ok(resp)) => {
                *held = Some(resp.key().to_vec());
                log::trace!("locked");
                Ok(true)
            }
            Ok(Err(e)) => {
                log::error!("lock error: {}", e);
                Err(e.into())
            }
            // Deadline exceeded means the mutex is contested, not an error.
            // The abandoned attempt may still acquire server-side later, so
            // delete its queue key (name + lease id in hex, etcd's layout).
            Err(_) => {
                let key = format!("{}/{:x}", MUTEX_NAME, self.lease_id);
                let mut cleanup = self.client.clone();
                tokio::spawn(async move {
                    let _ = cleanup.delete(key, None).await;
                });
                Ok(false)
            }
        }
    }

    async fn mutex_unlock(&self) -> Result<()> {
        log::trace!("unlocking");
        let mut held = self.lock_key.lock().await;
        let key = held
            .take()
            .ok_or_else(|| Error::Storage("mutex is not held by this session".to_string()))?;

        let mut client = self.client.clone();
        client.unlock(key).await.map_err(|e| {
            log::error!("unlock error: {}", e);
            Error::from(e)
        })?;
        log::trace!("unlocked");
        Ok(())
    }

    async fn dictionary_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        log::trace!("dictionary put");
        let mut client = self.client.clone();
        client.put(key, value, None).await.map_err(|e| {
            log::error!("dictionary put error: {}", e);
            Error::from(e)
        })?;
        Ok(())
    }

    async fn dictionary_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        log::trace!("dictionary get");
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(|e| {
            log::error!("dictionary get error: {}", e);
            Error::from(e)
        })?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn dictionary_remove(&self, key: &[u8]) -> Result<()> {
        log::trace!("dictionary remove");
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(|e| {
            log::error!("dictionary remove error: {}", e);
            Error::from(e)
        })?;
        Ok(())
    }
}
