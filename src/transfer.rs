/*!
 * Transfer orchestration: stream a routed blob to its destination and stamp
 * provenance metadata on the copy
 */

use crate::backend::{Backend, Metadata, WriteOptions};
use crate::error::{Result, RoutingError};
use crate::routing::RouteDecision;
use std::collections::HashMap;
use std::path::Path;

/// Metadata key recording which system produced the destination blob
pub const PROVIDER_KEY: &str = "system_provider";

/// Value stamped under `PROVIDER_KEY`
pub const PROVIDER_VALUE: &str = "DEX-ROUTING";

/// Result of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub source_url: String,
    pub destination_url: String,
    pub bytes: u64,
}

/// Copy of the source metadata with the provenance key set
pub fn stamp_provenance(source: &HashMap<String, String>) -> HashMap<String, String> {
    let mut metadata = source.clone();
    metadata.insert(PROVIDER_KEY.to_string(), PROVIDER_VALUE.to_string());
    metadata
}

/// Moves one blob from the ingest store to the destination store
///
/// A single best-effort attempt: no retries and no cleanup. Failures after
/// the upload began leave the destination as the store left it.
pub struct TransferOrchestrator<'a> {
    source: &'a dyn Backend,
    destination: &'a dyn Backend,
}

impl<'a> TransferOrchestrator<'a> {
    pub fn new(source: &'a dyn Backend, destination: &'a dyn Backend) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Stream `source_path` to the destination named by `decision`
    ///
    /// `source_meta` supplies the declared length and the metadata copied to
    /// the destination. Every upload overwrites, so repeating a transfer
    /// converges on the same destination state.
    ///
    /// # Errors
    ///
    /// - `SourceUnreadable` if the source stream cannot be opened; the
    ///   destination is not touched.
    /// - `TransferFailure` if the byte copy fails.
    /// - `MetadataWriteFailure` if the copy succeeded but stamping failed.
    ///   The destination blob is left in place.
    #[tracing::instrument(
        skip(self, decision, source_meta),
        fields(
            source = %source_path.display(),
            destination = %decision.destination_object_name(),
            size = source_meta.size
        )
    )]
    pub async fn transfer(
        &self,
        source_path: &Path,
        decision: &RouteDecision,
        source_meta: &Metadata,
    ) -> Result<TransferReceipt> {
        let stream = self
            .source
            .read(source_path)
            .await
            .map_err(RoutingError::SourceUnreadable)?;

        let destination = decision.destination_path();

        // The stream moves into the upload and is released on every path out of it
        let bytes = self
            .destination
            .write(destination, stream, source_meta.size, WriteOptions::new())
            .await
            .map_err(RoutingError::TransferFailure)?;
        tracing::debug!(bytes, "Blob bytes copied");

        let metadata = stamp_provenance(&source_meta.custom_metadata);
        self.destination
            .set_metadata(destination, &metadata)
            .await
            .map_err(RoutingError::MetadataWriteFailure)?;

        Ok(TransferReceipt {
            source_url: self.source.url_for(source_path),
            destination_url: self.destination.url_for(destination),
            bytes,
        })
    }
}
