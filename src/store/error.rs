use thiserror::Error;

use crate::storage::StorageError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {0} does not exist")]
    UserNotFound(String),

    #[error("user {0} already exists")]
    UserAlreadyExists(String),

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("{0} is already in the monitoring list")]
    AlreadyMonitoring(String),

    #[error("not monitoring {0}")]
    NotMonitoring(String),

    #[error("server {0} is not monitored")]
    ServerNotFound(String),

    /// The engine rejected a write; in-memory state already holds the change
    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

impl StoreError {
    /// Whether this error means something looked up does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_) | Self::NotMonitoring(_) | Self::ServerNotFound(_)
        )
    }

    /// Whether this error means something being created already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::UserAlreadyExists(_) | Self::AlreadyMonitoring(_))
    }
}
