//! Error types for the blob store backends
//!
//! Backend errors describe what went wrong while talking to a store. The
//! routing layer decides which stage of an invocation they belong to.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Unified error type for backend operations
#[derive(Debug)]
pub enum BackendError {
    /// I/O error while streaming object data
    Io(io::Error),

    /// Object not found on backend
    NotFound { path: PathBuf, backend: String },

    /// Invalid configuration for backend
    InvalidConfig { backend: String, message: String },

    /// Streamed byte count did not match the declared length
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Blob was replaced by another writer during a read-modify-write
    Modified { path: PathBuf },

    /// Generic backend error with context
    Other { backend: String, message: String },
}

impl BackendError {
    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    /// Map an `object_store` error onto a backend error for `path`
    pub(crate) fn from_object_store(
        err: object_store::Error,
        path: &std::path::Path,
        backend: &str,
        action: &str,
    ) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BackendError::NotFound {
                path: path.to_path_buf(),
                backend: backend.to_string(),
            },
            object_store::Error::Precondition { .. } => BackendError::Modified {
                path: path.to_path_buf(),
            },
            other => BackendError::Other {
                backend: backend.to_string(),
                message: format!("Failed to {}: {}", action, other),
            },
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Io(err) => write!(f, "I/O error: {}", err),
            BackendError::NotFound { path, backend } => {
                write!(f, "Object not found on {}: {}", backend, path.display())
            }
            BackendError::InvalidConfig { backend, message } => {
                write!(f, "Invalid configuration for {}: {}", backend, message)
            }
            BackendError::LengthMismatch {
                path,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Length mismatch for {}: declared {} bytes, streamed {}",
                    path.display(),
                    expected,
                    actual
                )
            }
            BackendError::Modified { path } => {
                write!(f, "Blob was modified concurrently: {}", path.display())
            }
            BackendError::Other { backend, message } => {
                write!(f, "Backend error on {}: {}", backend, message)
            }
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Io(err) => Some(err),
            _ => None,
        }
    }
}
