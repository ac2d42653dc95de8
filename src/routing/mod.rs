//! Routing decisions: rule set, resolver and the resulting destination

pub mod resolver;
pub mod rules;

pub use resolver::{is_unknown_type, resolve, MatchKind, Resolution};
pub use rules::{RoutingRule, RuleSet, StagingLocations, FALLBACK_TAG};

use std::path::Path;

/// Where one ingested blob is going
///
/// The destination object name keeps only the last path segment of the
/// source file name, placed under the rule's destination container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    destination_container: String,
    destination_object_name: String,
    kind: MatchKind,
}

impl RouteDecision {
    pub fn new(destination_container: &str, file_name: &str, kind: MatchKind) -> Self {
        let base_name = file_name.rsplit('/').next().unwrap_or(file_name);
        Self {
            destination_container: destination_container.to_string(),
            destination_object_name: format!(
                "{}/{}",
                destination_container.trim_end_matches('/'),
                base_name
            ),
            kind,
        }
    }

    /// Decision for a resolved rule
    pub fn from_resolution(resolution: &Resolution<'_>, file_name: &str) -> Self {
        Self::new(
            resolution.rule.destination_container(),
            file_name,
            resolution.kind,
        )
    }

    pub fn destination_container(&self) -> &str {
        &self.destination_container
    }

    pub fn destination_object_name(&self) -> &str {
        &self.destination_object_name
    }

    pub fn destination_path(&self) -> &Path {
        Path::new(&self.destination_object_name)
    }

    pub fn is_degraded(&self) -> bool {
        self.kind == MatchKind::Degraded
    }
}
