//! Configuration management for mcprobe
//!
//! This module handles loading, parsing, validating, and merging
//! configuration from a YAML file and CLI overrides. Configuration is
//! built once at startup and treated as immutable afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cli::Cli;
use crate::error::{McprobeError, Result};
use crate::mcp::auth::AuthConfig;

/// Main configuration structure for mcprobe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The MCP server endpoint URL.
    pub endpoint: String,

    /// Per-request timeout for MCP calls, in seconds.
    pub request_timeout_secs: u64,

    /// OAuth 2.1 authorization options.
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            request_timeout_secs: 30,
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from an optional YAML file and applies CLI
    /// overrides on top.
    ///
    /// # Arguments
    ///
    /// * `path` - Config file path; a missing file yields defaults when
    ///   the path was not explicitly requested.
    /// * `cli` - Parsed CLI arguments whose options override the file.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicitly named config file is missing
    /// or unparseable.
    pub fn load(path: Option<&str>, cli: &Cli) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(Path::new(path)).map_err(|e| {
                    McprobeError::Config(format!("cannot read config file {path:?}: {e}"))
                })?;
                serde_yaml::from_str(&text)
                    .map_err(|e| McprobeError::Config(format!("invalid config file {path:?}: {e}")))?
            }
            None => Config::default(),
        };

        config.apply_cli(cli);
        Ok(config)
    }

    /// Applies CLI overrides.
    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(endpoint) = &cli.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(timeout) = cli.timeout {
            self.request_timeout_secs = timeout;
        }
        if cli.no_auth {
            self.auth.enabled = false;
        }
        if let Some(client_id) = &cli.client_id {
            self.auth.client_id = client_id.clone();
        }
        if !cli.scopes.is_empty() {
            self.auth.scopes = cli.scopes.clone();
        }
    }

    /// Validates the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Config`] for a missing or invalid endpoint,
    /// a zero request timeout, or invalid authorization options.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(McprobeError::Config(
                "an MCP endpoint URL is required (argument or config file)".to_string(),
            )
            .into());
        }
        let endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| McprobeError::Config(format!("invalid endpoint URL: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(McprobeError::Config(format!(
                "endpoint must be http or https, got {:?}",
                endpoint.scheme()
            ))
            .into());
        }

        if self.request_timeout_secs == 0 {
            return Err(
                McprobeError::Config("request_timeout_secs must be positive".to_string()).into(),
            );
        }

        self.auth.validate()
    }

    /// The endpoint as a parsed URL. Call after [`Config::validate`].
    pub fn endpoint_url(&self) -> Result<url::Url> {
        Ok(url::Url::parse(&self.endpoint)?)
    }

    /// Per-request timeout as a [`std::time::Duration`].
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
