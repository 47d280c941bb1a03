use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("not in recovery")]
    NotInRecovery,

    #[error("promotion timeout")]
    PromotionTimeout,

    #[error("connection timeout")]
    ConnectionTimeout,

    #[error("master is not reachable within {0:?}")]
    MasterAwaitTimeout(Duration),

    #[error("master info is not available within {0:?}")]
    MasterInfoTimeout(Duration),

    #[error("inconsistent state: mutex is uncontested while detached")]
    InconsistentState,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Postgres(e.to_string())
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
