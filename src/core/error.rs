//! Error taxonomy shared by the fetch, storage and sync layers.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a provider failure, used to decide on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    Network,
    NotFound,
    Malformed,
    Unknown,
    Cancelled,
}

/// A failed call to the market-data provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("instrument not found at provider: {0}")]
    NotFound(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Unknown(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::Network(_) => FetchErrorKind::Network,
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
            FetchError::Unknown(_) => FetchErrorKind::Unknown,
            FetchError::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    /// Transient failures worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Timeout | FetchErrorKind::RateLimited | FetchErrorKind::Network
        )
    }
}

/// Local persistence failure. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("failed to (de)serialize stored record: {0}")]
    Serialization(String),

    #[error("storage lock poisoned")]
    Poisoned,

    /// The write targeted an instrument that is not (or no longer) registered.
    #[error("instrument {0} is not tracked")]
    NotTracked(String),
}

impl From<fjall::Error> for StorageError {
    fn from(err: fjall::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Why a single instrument's sync did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("instrument {0} is not tracked")]
    UnknownInstrument(String),

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled | SyncError::Fetch(FetchError::Cancelled))
    }
}

/// Why an instrument could not be registered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("instrument {0} is already tracked")]
    AlreadyTracked(String),

    #[error("could not look up instrument: {0}")]
    Lookup(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One or more instruments failed during a batch sync. The batch itself still
/// completed for every other instrument.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} of {total} instruments failed to sync: {}", .failed.len(), describe(.failed))]
pub struct PartialBatchFailure {
    pub total: usize,
    pub failed: Vec<(String, String)>,
}

fn describe(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(code, err)| format!("{code} ({err})"))
        .collect::<Vec<_>>()
        .join(", ")
}
