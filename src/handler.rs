/*!
 * Invocation handler: one ingested blob, start to finish
 *
 * Each invocation walks `Start → MetadataResolved → ConfigResolved →
 * RouteResolved → Transferred → Done`. Any step may end it with a
 * `RoutingError`; the failure reports the last stage reached together with
 * whatever context was known by then. The handler never logs failures at
 * error level itself. That is left to the trigger adapter via
 * [`acknowledge`].
 */

use crate::backend::{Backend, BackendResult, ObjectStoreBackend};
use crate::config::RouterConfig;
use crate::config_store::{CachedConfigStore, FileConfigStore, RouteConfigStore, SqliteConfigStore};
use crate::error::{Result, RoutingError};
use crate::event::{IngestionEvent, TriggerMessage};
use crate::routing::{resolve, RouteDecision, RuleSet, FALLBACK_TAG};
use crate::secrets::{EnvSecretStore, SecretStore};
use crate::transfer::TransferOrchestrator;
use secrecy::ExposeSecret;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Source metadata key carrying the message type
pub const MESSAGE_TYPE_KEY: &str = "message_type";

/// Progress of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InvocationStage {
    Start,
    MetadataResolved,
    ConfigResolved,
    RouteResolved,
    Transferred,
    Done,
}

impl fmt::Display for InvocationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationStage::Start => "Start",
            InvocationStage::MetadataResolved => "MetadataResolved",
            InvocationStage::ConfigResolved => "ConfigResolved",
            InvocationStage::RouteResolved => "RouteResolved",
            InvocationStage::Transferred => "Transferred",
            InvocationStage::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Successful routing of one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub source_url: String,
    pub message_type: String,
    pub destination_object_name: String,
    pub destination_url: String,
    pub bytes: u64,
    /// Routed by the fallback rule
    pub degraded: bool,
}

/// Terminal failure of one invocation, with the context reached so far
#[derive(Debug, Error)]
#[error("routing failed at {stage}: {error}")]
pub struct InvocationFailure {
    pub stage: InvocationStage,
    pub source_url: Option<String>,
    pub message_type: Option<String>,
    /// Attempted destination object name, once a route was resolved
    pub destination: Option<String>,
    #[source]
    pub error: RoutingError,
}

impl InvocationFailure {
    fn before_start(source_url: Option<&str>, error: RoutingError) -> Self {
        Self {
            stage: InvocationStage::Start,
            source_url: source_url.map(str::to_string),
            message_type: None,
            destination: None,
            error,
        }
    }
}

#[derive(Debug)]
struct Progress {
    stage: InvocationStage,
    message_type: Option<String>,
    destination: Option<String>,
}

impl Progress {
    fn new() -> Self {
        Self {
            stage: InvocationStage::Start,
            message_type: None,
            destination: None,
        }
    }

    fn advance(&mut self, stage: InvocationStage) {
        tracing::debug!(from = %self.stage, to = %stage, "Invocation stage");
        self.stage = stage;
    }

    fn into_failure(self, source_url: &str, error: RoutingError) -> InvocationFailure {
        InvocationFailure {
            stage: self.stage,
            source_url: Some(source_url.to_string()),
            message_type: self.message_type,
            destination: self.destination,
            error,
        }
    }
}

/// Routes ingested blobs to their destination containers
///
/// Holds only shared, read-only collaborators, so one handler serves any
/// number of concurrent invocations.
pub struct InvocationHandler {
    config: RouterConfig,
    source: Arc<dyn Backend>,
    destination: Arc<dyn Backend>,
    secrets: Arc<dyn SecretStore>,
    config_store: Arc<dyn RouteConfigStore>,
}

impl InvocationHandler {
    pub fn new(
        config: RouterConfig,
        source: Arc<dyn Backend>,
        destination: Arc<dyn Backend>,
        secrets: Arc<dyn SecretStore>,
        config_store: Arc<dyn RouteConfigStore>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            secrets,
            config_store,
        }
    }

    /// Build the production handler: Azure containers, environment secrets,
    /// and a SQLite (or directory) configuration store, cached when a TTL is
    /// configured
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidConfig` if a storage client cannot be
    /// built.
    pub fn from_config(config: RouterConfig) -> BackendResult<Self> {
        let source = ObjectStoreBackend::azure(
            &config.ingest.account,
            &config.ingest.container,
            config.ingest.connection_string.as_ref().map(|s| s.expose_secret()),
        )?;
        let destination = ObjectStoreBackend::azure(
            &config.destination.account,
            &config.destination.container,
            config
                .destination
                .connection_string
                .as_ref()
                .map(|s| s.expose_secret()),
        )?;

        let mut config_store: Arc<dyn RouteConfigStore> = match &config.config_directory {
            Some(dir) => Arc::new(FileConfigStore::new(dir.clone())),
            None => Arc::new(SqliteConfigStore::new()),
        };
        if let Some(ttl) = config.config_cache_ttl() {
            config_store = Arc::new(CachedConfigStore::new(config_store, ttl));
        }

        let secrets = Arc::new(EnvSecretStore::with_prefix(config.secret_env_prefix.clone()));

        Ok(Self::new(
            config,
            Arc::new(source),
            Arc::new(destination),
            secrets,
            config_store,
        ))
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route the first record of a raw trigger message
    ///
    /// Further records are logged as ignored.
    pub async fn handle_message(
        &self,
        message: &str,
    ) -> std::result::Result<RouteReport, InvocationFailure> {
        let trigger = TriggerMessage::parse(message)
            .map_err(|e| InvocationFailure::before_start(None, e))?;

        for url in trigger.ignored_urls() {
            tracing::warn!(source_url = url, "Ignoring additional record in trigger message");
        }

        let event = trigger
            .first_event(&self.config.ingest.container)
            .map_err(|e| InvocationFailure::before_start(trigger.first_url(), e))?;

        self.handle(&event).await
    }

    /// Route one ingested blob
    ///
    /// With an invocation timeout configured, an invocation still running at
    /// the deadline is abandoned with `DeadlineExceeded`.
    #[tracing::instrument(skip(self, event), fields(source_url = %event.source_url()))]
    pub async fn handle(
        &self,
        event: &IngestionEvent,
    ) -> std::result::Result<RouteReport, InvocationFailure> {
        let mut progress = Progress::new();

        let outcome = match self.config.invocation_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, self.run(event, &mut progress)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RoutingError::DeadlineExceeded {
                        secs: limit.as_secs(),
                    }),
                }
            }
            None => self.run(event, &mut progress).await,
        };

        outcome.map_err(|error| progress.into_failure(event.source_url(), error))
    }

    async fn run(&self, event: &IngestionEvent, progress: &mut Progress) -> Result<RouteReport> {
        let source_path = event.source_path();

        let source_meta = self
            .source
            .stat(source_path)
            .await
            .map_err(RoutingError::SourceUnreadable)?;
        let message_type = source_meta
            .get(MESSAGE_TYPE_KEY)
            .filter(|t| !t.is_empty())
            .unwrap_or(FALLBACK_TAG)
            .to_string();
        progress.message_type = Some(message_type.clone());
        progress.advance(InvocationStage::MetadataResolved);

        let rules = self.load_rules().await?;
        tracing::debug!(rules = rules.len(), use_case = %self.config.use_case, "Routing rules loaded");
        progress.advance(InvocationStage::ConfigResolved);

        let resolution = resolve(&message_type, rules.rules())?;
        let decision = RouteDecision::from_resolution(&resolution, event.file_name());
        progress.destination = Some(decision.destination_object_name().to_string());
        if decision.is_degraded() {
            tracing::warn!(
                message_type = %message_type,
                destination = decision.destination_object_name(),
                "No rule claims message type, routing with fallback rule"
            );
        }
        progress.advance(InvocationStage::RouteResolved);

        let receipt = TransferOrchestrator::new(self.source.as_ref(), self.destination.as_ref())
            .transfer(source_path, &decision, &source_meta)
            .await?;
        progress.advance(InvocationStage::Transferred);

        tracing::info!(
            source_url = event.source_url(),
            destination_url = %receipt.destination_url,
            message_type = %message_type,
            bytes = receipt.bytes,
            "Blob routed"
        );
        progress.advance(InvocationStage::Done);

        Ok(RouteReport {
            source_url: event.source_url().to_string(),
            message_type,
            destination_object_name: decision.destination_object_name().to_string(),
            destination_url: receipt.destination_url,
            bytes: receipt.bytes,
            degraded: decision.is_degraded(),
        })
    }

    async fn load_rules(&self) -> Result<RuleSet> {
        let credential = self
            .secrets
            .get_secret(&self.config.config_secret_name)
            .await
            .map_err(|e| RoutingError::ConfigUnavailable(e.to_string()))?;

        let document = self
            .config_store
            .get_routing_config(&credential, &self.config.use_case)
            .await?
            .ok_or_else(|| {
                RoutingError::ConfigUnavailable(format!(
                    "no routing configuration for use case '{}'",
                    self.config.use_case
                ))
            })?;

        RuleSet::from_json(&document)
    }
}

/// Log the outcome of an invocation and swallow any failure
///
/// The trigger framework never sees routing errors: each one is terminal
/// and retrying is left to whoever re-delivers the event.
pub fn acknowledge(outcome: std::result::Result<RouteReport, InvocationFailure>) {
    match outcome {
        Ok(report) => {
            tracing::debug!(
                source_url = %report.source_url,
                destination = %report.destination_object_name,
                degraded = report.degraded,
                "Invocation acknowledged"
            );
        }
        Err(failure) => {
            tracing::error!(
                reason = failure.error.kind(),
                stage = %failure.stage,
                source_url = failure.source_url.as_deref().unwrap_or("-"),
                message_type = failure.message_type.as_deref().unwrap_or("-"),
                destination = failure.destination.as_deref().unwrap_or("-"),
                partial_destination = failure.error.may_leave_partial_destination(),
                error = %failure.error,
                "Routing failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::WriteOptions;
    use crate::config::StorageConfig;
    use crate::config_store::StaticConfigStore;
    use crate::secrets::StaticSecretStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use secrecy::SecretString;
    use std::collections::HashMap;
    use std::path::Path;

    const INGEST: &str = "hl7ingress";
    const SECRET: &str = "ConfigSQLDBConnection";
    const RULES: &str = r#"[
        {"messageTypes": ["HL7"], "stagingLocations": {"destinationContainer": "hl7-out"}},
        {"messageTypes": ["?"], "stagingLocations": {"destinationContainer": "misc"}}
    ]"#;

    fn url(name: &str) -> String {
        format!("https://ingest.blob.core.windows.net/{}/{}", INGEST, name)
    }

    fn router_config() -> RouterConfig {
        RouterConfig::new(
            StorageConfig::new("ingest", INGEST),
            StorageConfig::new("routed", "routed"),
        )
    }

    struct PendingStore;

    #[async_trait]
    impl RouteConfigStore for PendingStore {
        async fn get_routing_config(
            &self,
            _credential: &SecretString,
            _use_case: &str,
        ) -> Result<Option<String>> {
            std::future::pending().await
        }
    }

    async fn seed(backend: &ObjectStoreBackend, name: &str, message_type: Option<&str>) {
        let mut metadata = HashMap::new();
        if let Some(t) = message_type {
            metadata.insert(MESSAGE_TYPE_KEY.to_string(), t.to_string());
        }
        let data = Bytes::from_static(b"MSH|^~\\&|");
        let size = data.len() as u64;
        backend
            .write(
                Path::new(name),
                Box::pin(stream::iter(vec![Ok::<_, std::io::Error>(data)])),
                size,
                WriteOptions::new().with_metadata(metadata),
            )
            .await
            .unwrap();
    }

    fn handler(
        config: RouterConfig,
        source: Arc<ObjectStoreBackend>,
        destination: Arc<ObjectStoreBackend>,
        config_store: Arc<dyn RouteConfigStore>,
    ) -> InvocationHandler {
        InvocationHandler::new(
            config,
            source,
            destination,
            Arc::new(StaticSecretStore::new().with_secret(SECRET, "unused")),
            config_store,
        )
    }

    fn static_rules(document: &str) -> Arc<dyn RouteConfigStore> {
        Arc::new(StaticConfigStore::new().with_document("UploadAPI", document))
    }

    #[test]
    fn test_stage_order_and_display() {
        assert!(InvocationStage::Start < InvocationStage::MetadataResolved);
        assert!(InvocationStage::Transferred < InvocationStage::Done);
        assert_eq!(InvocationStage::RouteResolved.to_string(), "RouteResolved");
    }

    #[tokio::test]
    async fn test_missing_message_type_uses_fallback() {
        let source = Arc::new(ObjectStoreBackend::in_memory());
        let destination = Arc::new(ObjectStoreBackend::in_memory());
        seed(&source, "a/b/untyped.dat", None).await;

        let h = handler(router_config(), source, destination.clone(), static_rules(RULES));
        let event = IngestionEvent::new(&url("a/b/untyped.dat"), INGEST).unwrap();
        let report = h.handle(&event).await.unwrap();

        assert_eq!(report.message_type, FALLBACK_TAG);
        assert_eq!(report.destination_object_name, "misc/untyped.dat");
        assert!(report.degraded);
        assert!(destination.exists(Path::new("misc/untyped.dat")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_secret_is_config_unavailable() {
        let source = Arc::new(ObjectStoreBackend::in_memory());
        seed(&source, "msg.hl7", Some("HL7")).await;

        let h = InvocationHandler::new(
            router_config(),
            source,
            Arc::new(ObjectStoreBackend::in_memory()),
            Arc::new(StaticSecretStore::new()),
            static_rules(RULES),
        );
        let event = IngestionEvent::new(&url("msg.hl7"), INGEST).unwrap();
        let failure = h.handle(&event).await.unwrap_err();

        assert!(matches!(failure.error, RoutingError::ConfigUnavailable(_)));
        assert_eq!(failure.stage, InvocationStage::MetadataResolved);
        assert_eq!(failure.message_type.as_deref(), Some("HL7"));
        assert!(failure.destination.is_none());
    }

    #[tokio::test]
    async fn test_missing_document_is_config_unavailable() {
        let source = Arc::new(ObjectStoreBackend::in_memory());
        seed(&source, "msg.hl7", Some("HL7")).await;

        let h = handler(
            router_config(),
            source,
            Arc::new(ObjectStoreBackend::in_memory()),
            Arc::new(StaticConfigStore::new()),
        );
        let event = IngestionEvent::new(&url("msg.hl7"), INGEST).unwrap();
        let failure = h.handle(&event).await.unwrap_err();
        assert!(matches!(failure.error, RoutingError::ConfigUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_document_is_config_unavailable() {
        let source = Arc::new(ObjectStoreBackend::in_memory());
        seed(&source, "msg.hl7", Some("HL7")).await;

        let h = handler(
            router_config(),
            source,
            Arc::new(ObjectStoreBackend::in_memory()),
            static_rules("   "),
        );
        let event = IngestionEvent::new(&url("msg.hl7"), INGEST).unwrap();
        let failure = h.handle(&event).await.unwrap_err();
        assert!(matches!(failure.error, RoutingError::ConfigUnavailable(_)));
        assert_eq!(failure.error.kind(), "ConfigUnavailable");
    }

    #[tokio::test]
    async fn test_deadline_exceeded_reports_stage() {
        let source = Arc::new(ObjectStoreBackend::in_memory());
        seed(&source, "msg.hl7", Some("HL7")).await;

        let mut config = router_config();
        config.invocation_timeout_secs = Some(1);
        let h = handler(
            config,
            source,
            Arc::new(ObjectStoreBackend::in_memory()),
            Arc::new(PendingStore),
        );
        let event = IngestionEvent::new(&url("msg.hl7"), INGEST).unwrap();
        let failure = h.handle(&event).await.unwrap_err();

        assert!(matches!(failure.error, RoutingError::DeadlineExceeded { secs: 1 }));
        assert_eq!(failure.stage, InvocationStage::MetadataResolved);
        assert_eq!(failure.source_url.as_deref(), Some(url("msg.hl7").as_str()));
    }

    #[tokio::test]
    async fn test_handle_message_routes_first_record() {
        let source = Arc::new(ObjectStoreBackend::in_memory());
        let destination = Arc::new(ObjectStoreBackend::in_memory());
        seed(&source, "incoming/msg.hl7", Some("HL7")).await;
        seed(&source, "incoming/other.hl7", Some("HL7")).await;

        let h = handler(router_config(), source, destination.clone(), static_rules(RULES));
        let message = format!(
            r#"[{{"data": {{"url": "{}"}}}}, {{"data": {{"url": "{}"}}}}]"#,
            url("incoming/msg.hl7"),
            url("incoming/other.hl7")
        );
        let report = h.handle_message(&message).await.unwrap();

        assert_eq!(report.destination_object_name, "hl7-out/msg.hl7");
        assert!(!destination.exists(Path::new("hl7-out/other.hl7")).await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_message_invalid_event() {
        let h = handler(
            router_config(),
            Arc::new(ObjectStoreBackend::in_memory()),
            Arc::new(ObjectStoreBackend::in_memory()),
            static_rules(RULES),
        );

        let failure = h.handle_message("not json").await.unwrap_err();
        assert!(matches!(failure.error, RoutingError::InvalidEvent(_)));
        assert_eq!(failure.stage, InvocationStage::Start);
        assert!(failure.source_url.is_none());

        let outside = r#"[{"data": {"url": "https://ingest.blob.core.windows.net/elsewhere/a.csv"}}]"#;
        let failure = h.handle_message(outside).await.unwrap_err();
        assert!(matches!(failure.error, RoutingError::InvalidEvent(_)));
        assert_eq!(
            failure.source_url.as_deref(),
            Some("https://ingest.blob.core.windows.net/elsewhere/a.csv")
        );
    }

    #[test]
    fn test_acknowledge_swallows_failure() {
        acknowledge(Err(InvocationFailure::before_start(
            None,
            RoutingError::InvalidEvent("empty".to_string()),
        )));
        acknowledge(Ok(RouteReport {
            source_url: url("msg.hl7"),
            message_type: "HL7".to_string(),
            destination_object_name: "hl7-out/msg.hl7".to_string(),
            destination_url: "memory://hl7-out/msg.hl7".to_string(),
            bytes: 9,
            degraded: false,
        }));
    }

    #[test]
    fn test_failure_display() {
        let failure = InvocationFailure {
            stage: InvocationStage::ConfigResolved,
            source_url: Some(url("a.csv")),
            message_type: Some("CSV".to_string()),
            destination: None,
            error: RoutingError::NoRouteAvailable {
                message_type: "CSV".to_string(),
            },
        };
        assert_eq!(
            failure.to_string(),
            "routing failed at ConfigResolved: No route for message type 'CSV' and no fallback rule defined"
        );
    }
}
