//! Secret resolution for the router's collaborators
//!
//! The router needs exactly one secret per invocation: the credential for
//! the routing configuration database. Values are held as `SecretString`
//! and never logged.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;

/// Secret lookup failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    /// No secret with this name exists
    #[error("Secret '{name}' not found")]
    NotFound { name: String },

    /// The secret source could not be queried
    #[error("Secret '{name}' unavailable: {message}")]
    Unavailable { name: String, message: String },
}

/// Resolves secret values by name
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<SecretString, SecretError>;
}

/// Secrets read from process environment variables
///
/// A secret name maps to an upper-cased variable with every character that
/// is not ASCII alphanumeric replaced by `_`, optionally prefixed:
/// `ConfigSQLDBConnection` → `{PREFIX}CONFIGSQLDBCONNECTION`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `name`
    pub fn variable_for(&self, name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<SecretString, SecretError> {
        let variable = self.variable_for(name);
        match std::env::var(&variable) {
            Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
            Ok(_) | Err(std::env::VarError::NotPresent) => Err(SecretError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(SecretError::Unavailable {
                name: name.to_string(),
                message: format!("{}: {}", variable, e),
            }),
        }
    }
}

/// Fixed set of secrets, for local runs and tests
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<SecretString, SecretError> {
        self.secrets
            .get(name)
            .map(|value| SecretString::from(value.clone()))
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
            })
    }
}
