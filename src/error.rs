/*!
 * Error types for the ingest router
 */

use crate::backend::BackendError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoutingError>;

/// Terminal failure reasons for a single routing invocation
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Routing configuration missing, empty, malformed or unreachable
    #[error("Routing configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// No rule claims the message type and no fallback rule is defined
    #[error("No route for message type '{message_type}' and no fallback rule defined")]
    NoRouteAvailable { message_type: String },

    /// Source blob missing or its stream could not be opened
    #[error("Source blob unreadable: {0}")]
    SourceUnreadable(#[source] BackendError),

    /// Byte copy to the destination failed
    #[error("Transfer to destination failed: {0}")]
    TransferFailure(#[source] BackendError),

    /// Bytes were copied but the provenance metadata could not be applied
    #[error("Destination metadata write failed: {0}")]
    MetadataWriteFailure(#[source] BackendError),

    /// Trigger message could not be turned into an ingestion event
    #[error("Invalid trigger event: {0}")]
    InvalidEvent(String),

    /// Invocation did not finish before its deadline
    #[error("Invocation deadline of {secs}s exceeded")]
    DeadlineExceeded { secs: u64 },
}

impl RoutingError {
    /// Short, stable name of the failure used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingError::ConfigUnavailable(_) => "ConfigUnavailable",
            RoutingError::NoRouteAvailable { .. } => "NoRouteAvailable",
            RoutingError::SourceUnreadable(_) => "SourceUnreadable",
            RoutingError::TransferFailure(_) => "TransferFailure",
            RoutingError::MetadataWriteFailure(_) => "MetadataWriteFailure",
            RoutingError::InvalidEvent(_) => "InvalidEvent",
            RoutingError::DeadlineExceeded { .. } => "DeadlineExceeded",
        }
    }

    /// Whether a destination blob may exist in an inconsistent state
    ///
    /// True for failures after the upload started; such blobs need external
    /// reconciliation since the router never cleans up.
    pub fn may_leave_partial_destination(&self) -> bool {
        matches!(
            self,
            RoutingError::TransferFailure(_)
                | RoutingError::MetadataWriteFailure(_)
                | RoutingError::DeadlineExceeded { .. }
        )
    }
}
