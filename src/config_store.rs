//! Routing configuration stores
//!
//! A configuration store returns the raw JSON rule document for a use case.
//! Decoding and validation happen in `routing::RuleSet`.

use crate::error::{Result, RoutingError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Query equivalent of the `GetRouterConfigByUseCase` stored procedure
pub const CONFIG_QUERY: &str =
    "SELECT ConfigurationJSON FROM RouterConfig WHERE UseCase = ?1 ORDER BY rowid";

/// Source of routing configuration documents
#[async_trait]
pub trait RouteConfigStore: Send + Sync {
    /// Fetch the configuration document for `use_case`
    ///
    /// `credential` is the configuration database credential resolved from
    /// the secret store; stores that need none ignore it. `Ok(None)` means
    /// the store holds no document for the use case.
    async fn get_routing_config(
        &self,
        credential: &SecretString,
        use_case: &str,
    ) -> Result<Option<String>>;
}

/// Configuration held in a SQLite `RouterConfig` table
///
/// The credential is the database location (a path or `file:` URI). When a
/// use case has several rows the last one returned wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConfigStore;

impl SqliteConfigStore {
    pub fn new() -> Self {
        Self
    }

    fn query(location: &str, use_case: &str) -> rusqlite::Result<Option<String>> {
        let conn = Connection::open_with_flags(
            location,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        let mut stmt = conn.prepare(CONFIG_QUERY)?;
        let rows = stmt.query_map(params![use_case], |row| row.get::<_, Option<String>>(0))?;

        let mut document = None;
        for row in rows {
            document = row?;
        }
        Ok(document)
    }
}

#[async_trait]
impl RouteConfigStore for SqliteConfigStore {
    #[tracing::instrument(skip(self, credential))]
    async fn get_routing_config(
        &self,
        credential: &SecretString,
        use_case: &str,
    ) -> Result<Option<String>> {
        let location = credential.expose_secret().to_string();
        let use_case = use_case.to_string();

        tokio::task::spawn_blocking(move || Self::query(&location, &use_case))
            .await
            .map_err(|e| RoutingError::ConfigUnavailable(format!("configuration query task failed: {}", e)))?
            .map_err(|e| RoutingError::ConfigUnavailable(format!("configuration query failed: {}", e)))
    }
}

/// Configuration documents stored as `{dir}/{use_case}.json`
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, use_case: &str) -> PathBuf {
        self.dir.join(format!("{}.json", use_case))
    }
}

#[async_trait]
impl RouteConfigStore for FileConfigStore {
    #[tracing::instrument(skip(self, _credential))]
    async fn get_routing_config(
        &self,
        _credential: &SecretString,
        use_case: &str,
    ) -> Result<Option<String>> {
        let path = self.path_for(use_case);
        match tokio::fs::read_to_string(&path).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RoutingError::ConfigUnavailable(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Fixed documents keyed by use case, for local runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    documents: HashMap<String, String>,
}

impl StaticConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, use_case: impl Into<String>, document: impl Into<String>) -> Self {
        self.documents.insert(use_case.into(), document.into());
        self
    }
}

#[async_trait]
impl RouteConfigStore for StaticConfigStore {
    async fn get_routing_config(
        &self,
        _credential: &SecretString,
        use_case: &str,
    ) -> Result<Option<String>> {
        Ok(self.documents.get(use_case).cloned())
    }
}

struct CachedDocument {
    fetched_at: Instant,
    document: String,
}

/// Time-bounded cache in front of another configuration store
///
/// Only documents are cached; misses and errors always reach the inner
/// store. Entries are never modified after insertion, only replaced once
/// they expire.
pub struct CachedConfigStore {
    inner: Arc<dyn RouteConfigStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedDocument>>,
}

impl CachedConfigStore {
    pub fn new(inner: Arc<dyn RouteConfigStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RouteConfigStore for CachedConfigStore {
    async fn get_routing_config(
        &self,
        credential: &SecretString,
        use_case: &str,
    ) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(use_case) {
                if cached.fetched_at.elapsed() < self.ttl {
                    tracing::debug!(use_case, "Routing configuration served from cache");
                    return Ok(Some(cached.document.clone()));
                }
            }
        }

        let document = self.inner.get_routing_config(credential, use_case).await?;

        if let Some(document) = &document {
            let mut entries = self.entries.write().await;
            entries.insert(
                use_case.to_string(),
                CachedDocument {
                    fetched_at: Instant::now(),
                    document: document.clone(),
                },
            );
        }

        Ok(document)
    }
}
