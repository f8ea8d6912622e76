//! Error types for the resource pool

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the pool, generic over the manager's error type `E`.
#[derive(Error, Debug, Clone)]
pub enum PoolError<E> {
    #[error("could not obtain a resource within {0:?}")]
    Timeout(Duration),

    #[error("checkin called by a thread that holds no detached checkout")]
    InvalidCheckin,

    #[error("resource is already borrowed by an enclosing scope on this thread")]
    ResourceBusy,

    #[error("resource factory failed: {0}")]
    Factory(#[source] E),

    #[error("invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to start idle reaper: {0}")]
    ReaperSpawn(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl<E> PoolError<E> {
    /// Whether this is a checkout deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;
