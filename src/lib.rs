/*!
 * Ingest Router - message-type routing for newly ingested blobs
 *
 * Each ingested blob is tagged with a `message_type` in its metadata. The
 * router looks the type up in an ordered rule set, streams the blob to the
 * destination container the first matching rule names (or to the fallback
 * rule's container), and stamps the copy with its provenance.
 *
 * - Routing rules loaded per invocation from a configuration store
 * - First-match resolution with a single optional fallback rule
 * - Streaming copy with declared-length validation, always overwriting
 * - Typed failures, logged and acknowledged by the trigger adapter
 */

pub mod backend;
pub mod config;
pub mod config_store;
pub mod error;
pub mod event;
pub mod handler;
pub mod logging;
pub mod routing;
pub mod secrets;
pub mod transfer;

// Re-export commonly used types
pub use config::{ConfigError, LogLevel, RouterConfig, StorageConfig};
pub use error::{Result, RoutingError};
pub use event::{IngestionEvent, TriggerMessage};
pub use handler::{acknowledge, InvocationFailure, InvocationHandler, InvocationStage, RouteReport};
pub use routing::{resolve, MatchKind, RouteDecision, RoutingRule, RuleSet};
pub use transfer::{TransferOrchestrator, TransferReceipt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
