//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use job_gateway_core::auth::DEFAULT_TOLERANCE_SECONDS;
use job_gateway_core::database::DatabaseTargets;
use job_gateway_core::dispatch::AllowList;
use job_gateway_core::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Environment variable naming an extra configuration file
pub const CONFIG_FILE_ENV: &str = "JOB_GATEWAY_CONFIG_FILE";

/// Prefix of configuration environment variables (`JG__WEBHOOK__SECRET`)
pub const ENV_PREFIX: &str = "JG";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook endpoint and credentials
    pub webhook: WebhookConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Database targets by name (`CFO`, `BOOSTA`, ...)
    pub databases: DatabaseTargets,

    /// Google Sheets access
    pub google: GoogleConfig,

    /// Slack bots and the monitoring channel
    pub slack: SlackConfig,

    /// Job dispatch settings
    pub jobs: JobsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Webhook endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Shared HMAC signing secret
    pub secret: Option<SecretString>,

    /// Legacy static token
    pub token: Option<SecretString>,

    /// Accepted clock skew for signed requests
    pub tolerance_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhook".to_string(),
            secret: None,
            token: None,
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Google Sheets configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// Service-account key file
    pub key_path: PathBuf,

    /// Token endpoint override; the key file's own endpoint otherwise
    pub token_uri: Option<String>,

    /// Sheets API base override
    pub api_base: Option<String>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("/google_keys/google_boosters_finance_key.json"),
            token_uri: None,
            api_base: None,
        }
    }
}

/// Slack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot token by bot name (`BOOSTA`, `META`)
    pub tokens: BTreeMap<String, SecretString>,

    /// Channel receiving job failure reports
    pub error_channel: String,

    /// Web API base override
    pub api_base: Option<String>,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            tokens: BTreeMap::new(),
            error_channel: "C04FQ47F231".to_string(),
            api_base: None,
        }
    }
}

/// Job dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JobsConfig {
    /// Restricts the built-in allow-list when present
    pub allow_list: Option<AllowList>,
}

impl ServiceConfig {
    /// Load configuration from the layered sources.
    ///
    /// Sources, later overriding earlier:
    ///  1. `/etc/job-gateway/service.yaml`
    ///  2. `./config/service.yaml`
    ///  3. the file named by `JOB_GATEWAY_CONFIG_FILE` (must exist when set)
    ///  4. environment variables prefixed `JG__`, e.g. `JG__SERVER__PORT=9090`
    ///
    /// Missing files leave the built-in defaults in place; a malformed file or
    /// a value of the wrong type is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/job-gateway/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Ok(explicit_path) = std::env::var(CONFIG_FILE_ENV) {
            if !explicit_path.is_empty() {
                builder = builder.add_source(
                    config::File::with_name(&explicit_path)
                        .required(true)
                        .format(config::FileFormat::Yaml),
                );
                info!(path = %explicit_path, "Loading configuration from explicit path");
            }
        }

        let loaded = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| ConfigError::Load {
                message: e.to_string(),
            })?;

        loaded
            .try_deserialize()
            .map_err(|e| ConfigError::Load {
                message: e.to_string(),
            })
    }

    /// Check the values that have no usable fallback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must not be 0".to_string(),
            });
        }

        if self.webhook.tolerance_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "webhook.tolerance_seconds must be positive".to_string(),
            });
        }

        if !self.webhook.endpoint_path.starts_with('/') || self.webhook.endpoint_path.len() < 2 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhook.endpoint_path '{}' must be a non-root absolute path",
                    self.webhook.endpoint_path
                ),
            });
        }

        Ok(())
    }

    /// The allow-list to serve, given the functions the registry provides.
    ///
    /// Without an override every available function is served. An override
    /// may only narrow the available set.
    pub fn effective_allow_list(&self, available: &AllowList) -> Result<AllowList, ConfigError> {
        let Some(requested) = &self.jobs.allow_list else {
            return Ok(available.clone());
        };

        if requested.is_empty() {
            return Err(ConfigError::Invalid {
                message: "jobs.allow_list must name at least one function".to_string(),
            });
        }

        if let Some((job, function)) = requested
            .pairs()
            .find(|(job, function)| !available.contains(job, function))
        {
            return Err(ConfigError::Invalid {
                message: format!("jobs.allow_list names unknown function {job}.{function}"),
            });
        }

        Ok(requested.clone())
    }

    /// Whether a target name is configured; names match case-insensitively
    pub fn has_database(&self, name: &str) -> bool {
        self.databases.resolve(name).is_ok()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
