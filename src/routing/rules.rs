//! Routing rule set loaded from the configuration store
//!
//! The configuration document is a JSON array of rules in the shape the
//! router's configuration database has always stored:
//!
//! ```json
//! [
//!   { "messageTypes": ["HL7"], "stagingLocations": { "destinationContainer": "hl7-out" } },
//!   { "messageTypes": ["?"], "fileType": "?", "stagingLocations": { "destinationContainer": "misc" } }
//! ]
//! ```

use crate::error::{Result, RoutingError};
use serde::{Deserialize, Serialize};

/// Reserved tag marking the fallback rule and unknown message types
pub const FALLBACK_TAG: &str = "?";

/// Where a rule sends matching blobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingLocations {
    /// Path prefix inside the destination container
    pub destination_container: String,
}

/// A single routing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    /// Message-type tags this rule claims
    #[serde(default)]
    pub message_types: Vec<String>,

    /// Legacy fallback marker; `"?"` designates the fallback rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    /// Destination of matching blobs
    pub staging_locations: StagingLocations,
}

impl RoutingRule {
    /// Create a rule claiming `message_types`
    pub fn new<I, S>(message_types: I, destination_container: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message_types: message_types.into_iter().map(Into::into).collect(),
            file_type: None,
            staging_locations: StagingLocations {
                destination_container: destination_container.into(),
            },
        }
    }

    /// Create the fallback rule
    pub fn fallback(destination_container: impl Into<String>) -> Self {
        Self::new([FALLBACK_TAG], destination_container)
    }

    pub fn destination_container(&self) -> &str {
        &self.staging_locations.destination_container
    }

    /// Exact, case-sensitive tag match
    pub fn claims(&self, message_type: &str) -> bool {
        self.message_types.iter().any(|t| t == message_type)
    }

    pub fn is_fallback(&self) -> bool {
        let tagged = self.message_types.len() == 1 && self.message_types[0] == FALLBACK_TAG;
        tagged || self.file_type.as_deref() == Some(FALLBACK_TAG)
    }
}

/// Validated, ordered collection of routing rules
///
/// Order is significant: when two rules claim the same message type the
/// first one declared wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting configurations the router cannot use
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::ConfigUnavailable` if there are no rules, a
    /// rule has no destination or no tags, or more than one fallback rule
    /// is declared.
    pub fn new(rules: Vec<RoutingRule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(RoutingError::ConfigUnavailable(
                "configuration defines no routing rules".to_string(),
            ));
        }

        for (index, rule) in rules.iter().enumerate() {
            if rule.destination_container().trim().is_empty() {
                return Err(RoutingError::ConfigUnavailable(format!(
                    "rule {} has an empty destination container",
                    index
                )));
            }
            if rule.message_types.is_empty() && !rule.is_fallback() {
                return Err(RoutingError::ConfigUnavailable(format!(
                    "rule {} claims no message types",
                    index
                )));
            }
        }

        let fallbacks = rules.iter().filter(|r| r.is_fallback()).count();
        if fallbacks > 1 {
            return Err(RoutingError::ConfigUnavailable(format!(
                "{} fallback rules defined, at most one allowed",
                fallbacks
            )));
        }

        Ok(Self { rules })
    }

    /// Decode a configuration document
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::ConfigUnavailable` for an empty or malformed
    /// document, or any rule set `RuleSet::new` rejects.
    pub fn from_json(document: &str) -> Result<Self> {
        if document.trim().is_empty() {
            return Err(RoutingError::ConfigUnavailable(
                "configuration document is empty".to_string(),
            ));
        }

        let rules: Vec<RoutingRule> = serde_json::from_str(document).map_err(|e| {
            RoutingError::ConfigUnavailable(format!("malformed routing configuration: {}", e))
        })?;

        Self::new(rules)
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn fallback(&self) -> Option<&RoutingRule> {
        self.rules.iter().find(|r| r.is_fallback())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
