//! Sentinel control loop
//!
//! The per-node state machine driving automatic failover:
//! - on startup establishes whether the local PostgreSQL is master or replica
//! - defends that role against the coordination storage on a periodic tick
//! - races surviving replicas for the master mutex when the master is lost
//! - re-seeds itself from a newly promoted master with a base backup
//!
//! Correctness rests on the storage mutex (at most one holder), the lease
//! TTL (floor on failover latency), and idempotent recovery from partial
//! failures: every error path either keeps the current role or degrades to
//! `Detached`, and the next tick re-arbitrates.

mod state;

pub use state::ClusterState;
use state::StateCell;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::hostinfo::{self, HostInfo};
use crate::pg::Cluster;
use crate::storage::{KEY_MASTER_INFO, Storage};

/// Default interval between periodic checks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default timeout for a replica to wait for the master to be ready.
pub const DEFAULT_PG_AWAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay between polls while waiting on the master.
pub const DEFAULT_PG_POLL_DELAY: Duration = Duration::from_secs(1);

/// Watches the local PostgreSQL instance and arbitrates its role.
pub struct Sentinel {
    cluster: Arc<dyn Cluster>,
    storage: Arc<dyn Storage>,
    self_info: HostInfo,
    self_payload: Bytes,

    interval: Duration,
    poll_delay: Duration,
    await_timeout: Duration,

    state: StateCell,
    // non-reentrancy guard: one tick never overlaps itself
    in_progress: AtomicBool,
    inner: Mutex<Inner>,

    err_tx: SyncMutex<Option<mpsc::Sender<Error>>>,
    err_rx: SyncMutex<Option<mpsc::Receiver<Error>>>,
}

#[derive(Default)]
struct Inner {
    observed_master: Option<HostInfo>,
    check_success: u64,
    check_errors: u64,
    last_check: Option<SystemTime>,
}

/// Snapshot of the sentinel's observable state.
#[derive(Debug, Clone)]
pub struct SentinelStatus {
    pub state: ClusterState,
    pub observed_master: Option<HostInfo>,
    pub check_success: u64,
    pub check_errors: u64,
    pub last_check: Option<SystemTime>,
}

impl Sentinel {
    /// Create a new sentinel for the given self address.
    pub fn new(
        cluster: Arc<dyn Cluster>,
        storage: Arc<dyn Storage>,
        self_host: impl Into<String>,
        self_pg_port: u16,
    ) -> Result<Self> {
        let self_info = HostInfo::new(self_host, self_pg_port);
        let self_payload = Bytes::from(hostinfo::encode(&self_info)?);
        let (err_tx, err_rx) = mpsc::channel(1);

        Ok(Self {
            cluster,
            storage,
            self_info,
            self_payload,
            interval: DEFAULT_INTERVAL,
            poll_delay: DEFAULT_PG_POLL_DELAY,
            await_timeout: DEFAULT_PG_AWAIT_TIMEOUT,
            state: StateCell::new(ClusterState::Detached),
            in_progress: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
            err_tx: SyncMutex::new(Some(err_tx)),
            err_rx: SyncMutex::new(Some(err_rx)),
        })
    }

    /// Set the check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the delay between polls while waiting on the master.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Set the timeout for waiting on the master.
    pub fn with_await_timeout(mut self, timeout: Duration) -> Self {
        self.await_timeout = timeout;
        self
    }

    /// Role of the local instance.
    pub fn state(&self) -> ClusterState {
        self.state.load()
    }

    /// Address advertised to peers when this instance is master.
    pub fn self_info(&self) -> &HostInfo {
        &self.self_info
    }

    /// Snapshot of role, observed master, and check counters.
    pub async fn status(&self) -> SentinelStatus {
        let inner = self.inner.lock().await;
        SentinelStatus {
            state: self.state.load(),
            observed_master: inner.observed_master.clone(),
            check_success: inner.check_success,
            check_errors: inner.check_errors,
            last_check: inner.last_check,
        }
    }

    /// Reset the check counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.check_success = 0;
        inner.check_errors = 0;
    }

    /// Take the receiver surfacing the latest check error. The channel is
    /// closed when the run loop stops.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<Error>> {
        self.err_rx.lock().take()
    }

    /// Establish the initial role. Must run once before [`Sentinel::run`];
    /// an error here means the process cannot participate in the cluster
    /// and should terminate.
    pub async fn prepare(&self) -> Result<()> {
        let in_recovery = self.cluster.in_recovery().await?;
        log::info!("cluster recovery mode: {}", in_recovery);

        if !in_recovery {
            self.prepare_master().await
        } else {
            self.await_master().await
        }
    }

    /// A non-recovery instance is either the rightful master or a stale
    /// former master that was superseded while down; the mutex decides.
    async fn prepare_master(&self) -> Result<()> {
        let locked = self.storage.mutex_try_lock().await?;
        log::debug!("mutex locked: {}", locked);

        if locked {
            self.state.store(ClusterState::Master);
            return self
                .storage
                .dictionary_put(KEY_MASTER_INFO, &self.self_payload)
                .await;
        }

        // Another node holds the master lock: this instance was superseded
        // while down. Re-seed from the published master.
        let master = self.get_master().await?;
        self.cluster.stop().await?;
        self.cluster.backup(&master.host, master.port).await?;
        self.cluster.start().await?;

        let mut inner = self.inner.lock().await;
        inner.observed_master = Some(master);
        self.state.store(ClusterState::Replica);
        Ok(())
    }

    /// An instance already in recovery is a replica by definition; wait
    /// until it actually streams from an upstream.
    async fn await_master(&self) -> Result<()> {
        let waited = timeout(self.await_timeout, async {
            loop {
                if let Some(master) = self.cluster.master_info().await? {
                    return Ok(master);
                }
                log::trace!("master is not reachable yet");
                sleep(self.poll_delay).await;
            }
        })
        .await;

        match waited {
            Ok(Ok(master)) => {
                let mut inner = self.inner.lock().await;
                inner.observed_master = Some(master);
                self.state.store(ClusterState::Replica);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::MasterAwaitTimeout(self.await_timeout)),
        }
    }

    /// Run the periodic check until `shutdown` is cancelled, then close the
    /// error channel so readers unblock.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // consume the immediate first tick; checks start one interval in
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.check().await,
            }
        }

        self.err_tx.lock().take();
        log::debug!("sentinel stopped");
    }

    async fn check(&self) {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::trace!("a check is already in progress");
            return;
        }

        let mut inner = self.inner.lock().await;

        let result = match self.state.load() {
            ClusterState::Master => self.check_master().await,
            ClusterState::Replica => self.check_replica(&mut inner).await,
            ClusterState::Detached => self.check_detached(&mut inner).await,
        };

        match result {
            Ok(()) => inner.check_success += 1,
            Err(e) => {
                inner.check_errors += 1;
                self.set_err(e);
            }
        }
        inner.last_check = Some(SystemTime::now());

        drop(inner);
        self.in_progress.store(false, Ordering::Release);
    }

    async fn check_master(&self) -> Result<()> {
        if matches!(self.cluster.alive().await, Ok(true)) {
            log::trace!("master is up");
            return Ok(());
        }

        log::warn!("master is down");
        // The lease is the authoritative role token: release it so the
        // surviving replicas can race for it. Local state stays Master
        // unless the release itself fails; an ambiguous lease sends the
        // next tick back through Detached arbitration.
        match self.storage.mutex_unlock().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.store(ClusterState::Detached);
                Err(e)
            }
        }
    }

    async fn check_replica(&self, inner: &mut Inner) -> Result<()> {
        log::trace!("checking replica");

        // Liveness is informational only: a dead replica has no role to
        // cede, and still races for the mutex below.
        match self.cluster.alive().await {
            Ok(true) => log::trace!("replica is up"),
            _ => log::warn!("replica is down"),
        }

        let locked = self.storage.mutex_try_lock().await.inspect_err(|e| {
            log::warn!("mutex error: {}", e);
        })?;

        if locked {
            // lock acquired means the previous holder's lease expired
            self.promote().await
        } else {
            self.follow(inner).await
        }
    }

    async fn check_detached(&self, inner: &mut Inner) -> Result<()> {
        match self.cluster.alive().await {
            Ok(true) => log::trace!("instance is up"),
            Ok(false) => {
                log::warn!("instance is down");
                return Ok(());
            }
            Err(e) => {
                log::warn!("instance is down");
                return Err(e);
            }
        }

        let locked = self.storage.mutex_try_lock().await.inspect_err(|e| {
            log::warn!("mutex error: {}", e);
        })?;

        if locked {
            // A detached node should never find the mutex uncontested:
            // either the cluster has no live members or the storage is
            // partitioned. Surfaced to the operator, never auto-repaired.
            return Err(Error::InconsistentState);
        }

        self.follow(inner).await?;
        self.state.store(ClusterState::Replica);
        Ok(())
    }

    /// Invariant at entry: this agent holds the master mutex while still in
    /// state `Replica`.
    async fn promote(&self) -> Result<()> {
        log::warn!("promoting");

        // Clear the stale pointer so no laggard follows the dead master.
        self.storage.dictionary_remove(KEY_MASTER_INFO).await?;

        if let Err(e) = self.cluster.promote().await {
            log::warn!("failed to promote: {}", e);
            let _ = self.storage.mutex_unlock().await;
            return Err(e);
        }

        log::debug!("waiting for recovery status to change");
        let confirmed = timeout(self.await_timeout, async {
            loop {
                if matches!(self.cluster.in_recovery().await, Ok(false)) {
                    // linger one poll after the flip before advertising
                    sleep(self.poll_delay).await;
                    return;
                }
                log::debug!("recovery status has not changed yet");
                sleep(self.poll_delay).await;
            }
        })
        .await;
        if confirmed.is_err() {
            return Err(Error::PromotionTimeout);
        }

        self.state.store(ClusterState::Master);
        self.storage
            .dictionary_put(KEY_MASTER_INFO, &self.self_payload)
            .await
    }

    /// Ensure this replica streams from whatever `master-info` names,
    /// re-seeding with a full base backup when the master changed.
    async fn follow(&self, inner: &mut Inner) -> Result<()> {
        let actual = self.get_master().await?;
        log::trace!("actual master: {}", actual);

        if inner.observed_master.as_ref() == Some(&actual) {
            return Ok(());
        }

        log::warn!("master changed to {}", actual);
        if let Err(e) = self.cluster.stop().await {
            self.state.store(ClusterState::Detached);
            return Err(e);
        }
        if let Err(e) = self.cluster.backup(&actual.host, actual.port).await {
            self.state.store(ClusterState::Detached);
            return Err(e);
        }
        if let Err(e) = self.cluster.start().await {
            self.state.store(ClusterState::Detached);
            return Err(e);
        }

        inner.observed_master = Some(actual);
        Ok(())
    }

    /// Poll the dictionary until `master-info` is present, then decode it.
    async fn get_master(&self) -> Result<HostInfo> {
        log::trace!("receiving master info");
        let polled = timeout(self.await_timeout, async {
            loop {
                if let Some(payload) = self.storage.dictionary_get(KEY_MASTER_INFO).await? {
                    return hostinfo::decode(&payload);
                }
                log::trace!("master info is not available yet");
                sleep(self.poll_delay).await;
            }
        })
        .await;

        match polled {
            Ok(result) => result,
            Err(_) => Err(Error::MasterInfoTimeout(self.await_timeout)),
        }
    }

    fn set_err(&self, err: Error) {
        log::debug!("registering error: {}", err);
        if let Some(tx) = self.err_tx.lock().as_ref() {
            // single-slot channel: keep the oldest unread error
            let _ = tx.try_send(err);
        }
    }
}
