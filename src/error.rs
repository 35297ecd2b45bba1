//! Error types for turnoq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no business could be resolved for '{0}'")]
    TenantNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("remote error: {0}")]
    Remote(#[from] sqlx::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
