/*!
 * Ingestion events delivered by the trigger
 *
 * A trigger message is a JSON array of blob-created records. Each record
 * carries the URL of the new blob under `data.url`.
 */

use crate::error::{Result, RoutingError};
use serde::Deserialize;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
struct EventRecord {
    data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
struct EventData {
    url: String,
}

/// Parsed trigger payload
#[derive(Debug, Clone)]
pub struct TriggerMessage {
    records: Vec<EventRecord>,
}

impl TriggerMessage {
    /// Parse a raw trigger message
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidEvent` for malformed JSON or an empty
    /// record array.
    pub fn parse(message: &str) -> Result<Self> {
        let records: Vec<EventRecord> = serde_json::from_str(message)
            .map_err(|e| RoutingError::InvalidEvent(format!("malformed trigger message: {}", e)))?;

        if records.is_empty() {
            return Err(RoutingError::InvalidEvent(
                "trigger message contains no records".to_string(),
            ));
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The event for the first record
    ///
    /// Only the first record of a message is routed. Callers are expected to
    /// report any further records as ignored.
    pub fn first_event(&self, ingest_container: &str) -> Result<IngestionEvent> {
        let record = self.records.first().ok_or_else(|| {
            RoutingError::InvalidEvent("trigger message contains no records".to_string())
        })?;
        IngestionEvent::new(&record.data.url, ingest_container)
    }

    pub fn first_url(&self) -> Option<&str> {
        self.records.first().map(|r| r.data.url.as_str())
    }

    /// Source URLs of the records that will not be routed
    pub fn ignored_urls(&self) -> impl Iterator<Item = &str> {
        self.records.iter().skip(1).map(|r| r.data.url.as_str())
    }
}

/// A newly ingested blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionEvent {
    source_url: String,
    file_name: String,
}

impl IngestionEvent {
    /// Derive the event for `source_url`
    ///
    /// The file name is the percent-decoded URL path following
    /// `/{ingest_container}/`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidEvent` if the URL is invalid, does not
    /// point inside the ingest container, or names no blob.
    pub fn new(source_url: &str, ingest_container: &str) -> Result<Self> {
        let url = Url::parse(source_url)
            .map_err(|e| RoutingError::InvalidEvent(format!("invalid source URL {}: {}", source_url, e)))?;

        let needle = format!("/{}/", ingest_container.trim_matches('/'));
        let path = url.path();
        let encoded = path
            .find(&needle)
            .map(|idx| &path[idx + needle.len()..])
            .ok_or_else(|| {
                RoutingError::InvalidEvent(format!(
                    "source URL {} is outside container {}",
                    source_url, ingest_container
                ))
            })?;

        if encoded.is_empty() || encoded.ends_with('/') {
            return Err(RoutingError::InvalidEvent(format!(
                "source URL {} does not name a blob",
                source_url
            )));
        }

        let decoded = object_store::path::Path::from_url_path(encoded).map_err(|e| {
            RoutingError::InvalidEvent(format!("invalid blob path in {}: {}", source_url, e))
        })?;

        Ok(Self {
            source_url: source_url.to_string(),
            file_name: decoded.as_ref().to_string(),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Blob name relative to the ingest container
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn source_path(&self) -> &Path {
        Path::new(&self.file_name)
    }
}
