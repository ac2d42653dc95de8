/*!
 * Configuration types for the ingest router
 */

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Use case key under which routing rules are stored
pub const DEFAULT_USE_CASE: &str = "UploadAPI";

/// Secret holding the configuration database credential
pub const DEFAULT_CONFIG_SECRET_NAME: &str = "ConfigSQLDBConnection";

/// Errors loading the router's own settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One blob storage account and container
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Storage account name
    pub account: String,

    /// Container name
    pub container: String,

    /// Azure connection string (None = object_store environment credentials)
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub connection_string: Option<SecretString>,
}

/// Settings the trigger adapter passes to the invocation handler
#[derive(Debug, Deserialize)]
pub struct RouterConfig {
    /// Container receiving newly ingested blobs
    pub ingest: StorageConfig,

    /// Container receiving routed blobs
    pub destination: StorageConfig,

    /// Use case key for the routing configuration lookup
    #[serde(default = "default_use_case")]
    pub use_case: String,

    /// Name of the secret holding the configuration database credential
    #[serde(default = "default_config_secret_name")]
    pub config_secret_name: String,

    /// Prefix for environment variables resolved as secrets
    #[serde(default)]
    pub secret_env_prefix: String,

    /// Read routing documents from `{dir}/{use_case}.json` instead of SQLite
    #[serde(default)]
    pub config_directory: Option<PathBuf>,

    /// Abandon an invocation after this many seconds (None = no deadline)
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,

    /// Cache routing documents for this many seconds (None = fetch every time)
    #[serde(default)]
    pub config_cache_ttl_secs: Option<u64>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    fn parse(key: &str, value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::Invalid {
                key: key.to_string(),
                message: format!("unknown log level '{}'", other),
            }),
        }
    }
}

fn default_use_case() -> String {
    DEFAULT_USE_CASE.to_string()
}

fn default_config_secret_name() -> String {
    DEFAULT_CONFIG_SECRET_NAME.to_string()
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl StorageConfig {
    pub fn new(account: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            connection_string: None,
        }
    }
}

impl RouterConfig {
    /// Configuration with defaults for everything except the two containers
    pub fn new(ingest: StorageConfig, destination: StorageConfig) -> Self {
        Self {
            ingest,
            destination,
            use_case: default_use_case(),
            config_secret_name: default_config_secret_name(),
            secret_env_prefix: String::new(),
            config_directory: None,
            invocation_timeout_secs: None,
            config_cache_ttl_secs: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RouterConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the process environment
    ///
    /// Reads the deployment's `BlobIngest*` / `BlobDestination*` settings
    /// and the optional `Router*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));
        let seconds = |key: &str| -> Result<Option<u64>, ConfigError> {
            get(key)
                .map(|v| {
                    v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
                })
                .transpose()
        };

        let mut ingest = StorageConfig::new(
            require("BlobIngestStorageAccountName")?,
            require("BlobIngestContainerName")?,
        );
        ingest.connection_string = get("BlobIngestConnectionString").map(SecretString::from);

        let mut destination = StorageConfig::new(
            require("BlobDestinationStorageAccountName")?,
            require("BlobDestinationContainerName")?,
        );
        destination.connection_string =
            get("BlobDestinationConnectionString").map(SecretString::from);

        let mut config = Self::new(ingest, destination);
        if let Some(use_case) = get("RouterUseCase") {
            config.use_case = use_case;
        }
        if let Some(name) = get("RouterConfigSecretName") {
            config.config_secret_name = name;
        }
        if let Some(prefix) = get("RouterSecretEnvPrefix") {
            config.secret_env_prefix = prefix;
        }
        config.config_directory = get("RouterConfigDirectory").map(PathBuf::from);
        config.invocation_timeout_secs = seconds("RouterInvocationTimeoutSecs")?;
        config.config_cache_ttl_secs = seconds("RouterConfigCacheTtlSecs")?;
        if let Some(level) = get("RouterLogLevel") {
            config.log_level = LogLevel::parse("RouterLogLevel", &level)?;
        }
        config.log_file = get("RouterLogFile").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the router cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("ingest.account", &self.ingest.account),
            ("ingest.container", &self.ingest.container),
            ("destination.account", &self.destination.account),
            ("destination.container", &self.destination.container),
            ("use_case", &self.use_case),
            ("config_secret_name", &self.config_secret_name),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }

        if self.invocation_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                key: "invocation_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_secs.map(Duration::from_secs)
    }

    pub fn config_cache_ttl(&self) -> Option<Duration> {
        self.config_cache_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
