pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hostinfo;
pub mod logging;
pub mod pg;
pub mod sentinel;
pub mod storage;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use hostinfo::HostInfo;
pub use pg::{Cluster, PgCluster};
pub use sentinel::{ClusterState, Sentinel};
pub use storage::{Storage, StorageKind};
