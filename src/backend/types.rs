//! Common types for the blob store backends

use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// Blob properties as seen by the routing layer
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Size in bytes
    pub size: u64,

    /// User-defined metadata key-value pairs
    pub custom_metadata: HashMap<String, String>,
}

impl Metadata {
    /// Create metadata for a blob of `size` bytes
    pub fn file(size: u64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Builder pattern: set user metadata
    pub fn with_custom_metadata(mut self, custom_metadata: HashMap<String, String>) -> Self {
        self.custom_metadata = custom_metadata;
        self
    }

    /// Look up a single user metadata value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.custom_metadata.get(key).map(String::as_str)
    }
}

/// Async read stream for blob data
pub type ReadStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Options for write operations
///
/// Writes always replace an existing blob.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// User metadata to store with the blob
    pub metadata: Option<HashMap<String, String>>,
}

impl WriteOptions {
    /// Create with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
