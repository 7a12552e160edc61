use std::path::{Path, PathBuf};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failure classes for every gateway, staging and relay operation.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Missing or invalid credentials, bucket or session setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure talking to the store. Absence is unknown, not confirmed.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Operation cancelled")]
    Cancelled,

    /// Bucket or object confirmed absent.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Local I/O error on {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store answered but rejected the request.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn local_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        StorageError::LocalIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Transport-level failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Connectivity(_) | StorageError::DeadlineExceeded
        )
    }

    /// Cancellation or deadline of the operation scope.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            StorageError::Cancelled | StorageError::DeadlineExceeded
        )
    }
}
