//! Blob store abstraction for the ingest and destination containers
//!
//! The router only needs a narrow slice of object storage: read a blob's
//! properties, stream it out, stream it into another container and replace
//! its user metadata. The `Backend` trait captures exactly that so the
//! routing core can run against Azure Blob Storage in production and an
//! in-memory store in tests.
//!
//! # Example
//!
//! ```no_run
//! use ingest_router::backend::{Backend, ObjectStoreBackend};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = ObjectStoreBackend::azure("ingestaccount", "ingest", None)?;
//!     let meta = backend.stat(Path::new("incoming/report.csv")).await?;
//!     println!("{} bytes, type {:?}", meta.size, meta.get("message_type"));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod types;

mod cloud;

pub use cloud::ObjectStoreBackend;
pub use error::{BackendError, BackendResult};
pub use types::{Metadata, ReadStream, WriteOptions};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// Storage operations the router performs against a blob container
///
/// Implementors must be `Send + Sync`; a single backend instance is shared by
/// every concurrent invocation and must not carry per-invocation state.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get size and user metadata for a blob
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the blob doesn't exist.
    async fn stat(&self, path: &Path) -> BackendResult<Metadata>;

    /// Open a blob for reading as a stream
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the blob doesn't exist.
    async fn read(&self, path: &Path) -> BackendResult<ReadStream>;

    /// Write a stream to a blob in a single pass
    ///
    /// `size` is the length the caller expects to stream. The backend checks
    /// it against the bytes actually received and fails the write with
    /// `BackendError::LengthMismatch` when they differ.
    ///
    /// The stream is consumed and dropped before this returns, on success and
    /// on failure alike.
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(
        &self,
        path: &Path,
        stream: ReadStream,
        size: u64,
        options: WriteOptions,
    ) -> BackendResult<u64>;

    /// Replace the user metadata of an existing blob
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the blob doesn't exist, and
    /// `BackendError::Modified` if another writer replaced it while the
    /// metadata was being applied.
    async fn set_metadata(&self, path: &Path, metadata: &HashMap<String, String>)
        -> BackendResult<()>;

    /// Check if a blob exists
    async fn exists(&self, path: &Path) -> BackendResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get the backend name/type (e.g., "azure", "memory")
    fn backend_name(&self) -> &str;

    /// Fully-qualified reference to a blob, used in log records
    fn url_for(&self, path: &Path) -> String {
        format!("{}://{}", self.backend_name(), path.display())
    }
}
