//! pgsentinel agent binary
//!
//! One agent runs next to each PostgreSQL instance. Wiring order: config,
//! logging, cluster adapter, metrics, coordination storage, sentinel
//! prepare + periodic loop, HTTP gateway. SIGINT/SIGTERM cancel everything.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pgsentinel::cli::Cli;
use pgsentinel::error::Result;
use pgsentinel::gateway::{self, AppState};
use pgsentinel::pg::{Cluster, PgCluster};
use pgsentinel::sentinel::Sentinel;
use pgsentinel::{logging, storage};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("pgsentinel: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Cli::load_config()?;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: logging already initialized: {}", e);
    }

    let hostname = config.self_hostname();
    log::info!(
        "starting pgsentinel {} on {}",
        env!("CARGO_PKG_VERSION"),
        hostname
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.cancel();
        });
    }

    let cluster: Arc<dyn Cluster> = Arc::new(PgCluster::new(&config)?);

    let prometheus_handle = if config.metrics_enabled {
        Some(gateway::metrics::install(&hostname)?)
    } else {
        None
    };

    let (major, minor) = cluster.version().await?;
    log::info!("PostgreSQL version: {}.{}", major, minor);

    let storage = storage::connect(
        config.storage_kind,
        &config.storage_bootstrap,
        config.storage_ttl,
        shutdown.clone(),
    )
    .await?;
    log::info!("coordination storage connected: {}", config.storage_kind);

    let sentinel = Arc::new(
        Sentinel::new(cluster.clone(), storage, hostname.clone(), config.pg_port)?
            .with_interval(config.check_interval),
    );
    sentinel.prepare().await?;
    log::info!(
        "prepared as {}, advertising {}",
        sentinel.state(),
        sentinel.self_info()
    );

    {
        let sentinel = sentinel.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sentinel.run(shutdown).await });
    }

    let state = AppState {
        cluster,
        hostname,
        prometheus_handle,
    };
    let addr = format!("{}:{}", config.listen_addr, config.http_port);
    log::info!("started");

    gateway::serve(&addr, state, shutdown).await?;

    log::info!("done");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("received SIGINT"),
        _ = terminate => log::info!("received SIGTERM"),
    }
}
