//! Rule resolution: exact match first, then the fallback rule

use super::rules::{RoutingRule, FALLBACK_TAG};
use crate::error::{Result, RoutingError};

/// How a rule was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// A rule claims the message type
    Exact,
    /// Nothing claims the message type; the fallback rule was used
    Degraded,
}

/// Outcome of resolving one message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub rule: &'a RoutingRule,
    pub kind: MatchKind,
}

impl Resolution<'_> {
    pub fn is_degraded(&self) -> bool {
        self.kind == MatchKind::Degraded
    }
}

/// True for message types that can never match a rule exactly
pub fn is_unknown_type(message_type: &str) -> bool {
    message_type.is_empty() || message_type == FALLBACK_TAG
}

/// Select the rule for `message_type`
///
/// Rules are scanned in order and the first rule claiming the type wins.
/// Unclaimed, empty and sentinel types resolve to the fallback rule as a
/// degraded match.
///
/// # Errors
///
/// Returns `RoutingError::NoRouteAvailable` when nothing claims the type and
/// no fallback rule exists (always the case for an empty slice).
pub fn resolve<'a>(message_type: &str, rules: &'a [RoutingRule]) -> Result<Resolution<'a>> {
    if !is_unknown_type(message_type) {
        if let Some(rule) = rules.iter().find(|r| r.claims(message_type)) {
            return Ok(Resolution {
                rule,
                kind: MatchKind::Exact,
            });
        }
    }

    rules
        .iter()
        .find(|r| r.is_fallback())
        .map(|rule| Resolution {
            rule,
            kind: MatchKind::Degraded,
        })
        .ok_or_else(|| RoutingError::NoRouteAvailable {
            message_type: message_type.to_string(),
        })
}
