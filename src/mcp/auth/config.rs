//! Authorization configuration
//!
//! This module defines [`AuthConfig`], the static per-process configuration
//! of the OAuth 2.1 authorization subsystem. The structure is constructed
//! once at startup (from the YAML config file plus CLI overrides),
//! validated, and then treated as immutable: every component reads from a
//! shared handle.

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{McprobeError, Result};

// ---------------------------------------------------------------------------
// ScopeSelectionMode
// ---------------------------------------------------------------------------

/// Governs how the scopes for an authorization request are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeSelectionMode {
    /// Challenge scopes, then resource metadata scopes, then omit the
    /// parameter entirely.
    #[default]
    Auto,
    /// Always request the configured `scopes`, warning when discovery
    /// disagrees.
    Manual,
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

/// OAuth 2.1 authorization options for one MCP endpoint.
///
/// All fields have serde defaults so a config file may specify only what it
/// overrides. Call [`AuthConfig::validate`] after construction; the rest of
/// the subsystem assumes a validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Gates the entire authorization subsystem. When false, requests pass
    /// through the transport unmodified.
    pub enabled: bool,

    /// Pre-registered OAuth client ID. When empty, Dynamic Client
    /// Registration (RFC 7591) is performed against the discovered
    /// registration endpoint.
    pub client_id: String,

    /// Client secret forwarded to the token endpoint when set.
    pub client_secret: String,

    /// Scope list; its meaning is governed by `scope_selection_mode`.
    pub scopes: Vec<String>,

    /// How scopes are selected for authorization requests.
    pub scope_selection_mode: ScopeSelectionMode,

    /// Loopback redirect URL for the authorization code callback. Must be
    /// `http://` on a loopback host; `https` is rejected because native
    /// loopback listeners have no certificate.
    pub redirect_url: String,

    /// Always true in practice; `S256` is the only supported method.
    pub use_pkce: bool,

    /// Bound on waiting for the user to complete authorization in the
    /// browser, in seconds.
    pub authorization_timeout_secs: u64,

    /// Enables OIDC nonce generation and echo. No signature validation is
    /// performed.
    pub use_oidc: bool,

    /// Bearer token attached to Dynamic Client Registration requests when
    /// present.
    pub registration_token: String,

    /// RFC 8707 resource indicator. Derived from the endpoint URL when
    /// empty.
    pub resource_uri: String,

    /// Testing override: disables resource-indicator injection.
    pub skip_resource_param: bool,

    /// Testing override: bypasses RFC 9728 protected resource metadata
    /// discovery. The authorization server is then taken from
    /// `preferred_auth_server`.
    pub skip_resource_metadata: bool,

    /// Selects an authorization server when the resource metadata lists
    /// several; with `skip_resource_metadata` it names the server directly.
    pub preferred_auth_server: String,

    /// Testing override: accepts servers that do not advertise `S256`.
    pub skip_pkce_validation: bool,

    /// Testing override: skips authorization server metadata discovery and
    /// derives conventional endpoint paths from the issuer.
    pub skip_auth_server_discovery: bool,

    /// Gates the step-up round-tripper that reacts to
    /// `403 insufficient_scope` responses.
    pub enable_step_up_auth: bool,

    /// Per-(host, path, method) cap on step-up re-authorization attempts.
    pub step_up_max_retries: u32,

    /// When true, step-up authorization requires an interactive
    /// confirmation; if no prompt implementation is wired in, step-up
    /// fails closed.
    pub step_up_user_prompt: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            client_secret: String::new(),
            scopes: Vec::new(),
            scope_selection_mode: ScopeSelectionMode::Auto,
            redirect_url: default_redirect_url(),
            use_pkce: true,
            authorization_timeout_secs: default_authorization_timeout_secs(),
            use_oidc: false,
            registration_token: String::new(),
            resource_uri: String::new(),
            skip_resource_param: false,
            skip_resource_metadata: false,
            preferred_auth_server: String::new(),
            skip_pkce_validation: false,
            skip_auth_server_discovery: false,
            enable_step_up_auth: true,
            step_up_max_retries: 2,
            step_up_user_prompt: false,
        }
    }
}

fn default_redirect_url() -> String {
    "http://localhost:8765/callback".to_string()
}

fn default_authorization_timeout_secs() -> u64 {
    300
}

impl AuthConfig {
    /// Returns the authorization wait bound as a [`std::time::Duration`].
    pub fn authorization_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.authorization_timeout_secs)
    }

    /// Validates the configuration.
    ///
    /// Checks performed when `enabled` is true:
    ///
    /// - `redirect_url` parses, uses `http`, and its host is a loopback
    ///   name or address (`localhost`, `127.0.0.1`, `::1`)
    /// - `authorization_timeout_secs` is positive
    /// - `step_up_max_retries` is positive when step-up is enabled
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        parse_loopback_redirect(&self.redirect_url)?;

        if self.authorization_timeout_secs == 0 {
            return Err(
                McprobeError::Config("authorization_timeout_secs must be positive".to_string())
                    .into(),
            );
        }

        if self.enable_step_up_auth && self.step_up_max_retries == 0 {
            return Err(McprobeError::Config(
                "step_up_max_retries must be positive when step-up authorization is enabled"
                    .to_string(),
            )
            .into());
        }

        if !self.resource_uri.is_empty() {
            crate::mcp::auth::resource::canonical_resource(&self.resource_uri)
                .map_err(|e| McprobeError::Config(format!("resource_uri invalid: {e}")))?;
        }

        Ok(())
    }
}

/// Parses and validates a loopback redirect URL.
///
/// The URL must be absolute, use the `http` scheme (an `https` redirect to
/// a local listener is explicitly rejected), and its host must be
/// `localhost`, `127.0.0.1`, or `::1` (any textual form of the IPv6
/// loopback address is accepted).
///
/// # Errors
///
/// Returns [`McprobeError::Config`] naming the violated rule.
pub fn parse_loopback_redirect(redirect_url: &str) -> Result<Url> {
    let url = Url::parse(redirect_url).map_err(|e| {
        McprobeError::Config(format!("redirect_url is not a valid URL: {redirect_url:?} ({e})"))
    })?;

    match url.scheme() {
        "http" => {}
        "https" => {
            return Err(McprobeError::Config(
                "redirect_url must use http; https is not supported for loopback callbacks"
                    .to_string(),
            )
            .into());
        }
        other => {
            return Err(McprobeError::Config(format!(
                "redirect_url scheme must be http, got {other:?}"
            ))
            .into());
        }
    }

    let loopback = match url.host() {
        Some(Host::Domain(name)) => name.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => addr == std::net::Ipv4Addr::LOCALHOST,
        Some(Host::Ipv6(addr)) => addr == std::net::Ipv6Addr::LOCALHOST,
        None => false,
    };

    if !loopback {
        return Err(McprobeError::Config(format!(
            "redirect_url host must be a loopback address, got {:?}",
            url.host_str().unwrap_or("")
        ))
        .into());
    }

    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert!(config.enabled);
        assert!(config.use_pkce);
        assert!(config.enable_step_up_auth);
        assert_eq!(config.step_up_max_retries, 2);
        assert_eq!(config.authorization_timeout_secs, 300);
        assert_eq!(config.scope_selection_mode, ScopeSelectionMode::Auto);
        assert!(!config.step_up_user_prompt);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn test_disabled_config_skips_validation() {
        let config = AuthConfig {
            enabled: false,
            redirect_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    // -----------------------------------------------------------------------
    // Serde
    // -----------------------------------------------------------------------

    #[test]
    fn test_deserializes_partial_yaml() {
        let yaml = r#"
            client_id: "my-client"
            scopes: ["files:read"]
            scope_selection_mode: manual
        "#;
        let config: AuthConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.client_id, "my-client");
        assert_eq!(config.scopes, vec!["files:read"]);
        assert_eq!(config.scope_selection_mode, ScopeSelectionMode::Manual);
        // Unspecified fields keep their defaults.
        assert!(config.enable_step_up_auth);
    }

    #[test]
    fn test_rejects_unknown_scope_mode() {
        let yaml = r#"scope_selection_mode: merge"#;
        assert!(serde_yaml::from_str::<AuthConfig>(yaml).is_err());
    }

    // -----------------------------------------------------------------------
    // parse_loopback_redirect
    // -----------------------------------------------------------------------

    #[test]
    fn test_redirect_accepts_localhost() {
        assert!(parse_loopback_redirect("http://localhost:8765/callback").is_ok());
        assert!(parse_loopback_redirect("http://LocalHost:8765/callback").is_ok());
    }

    #[test]
    fn test_redirect_accepts_ipv4_loopback() {
        assert!(parse_loopback_redirect("http://127.0.0.1:8765/callback").is_ok());
    }

    #[test]
    fn test_redirect_accepts_ipv6_loopback_forms() {
        assert!(parse_loopback_redirect("http://[::1]:8765/callback").is_ok());
        // The long textual form normalizes to ::1 during URL parsing.
        assert!(parse_loopback_redirect("http://[0:0:0:0:0:0:0:1]:8765/callback").is_ok());
    }

    #[test]
    fn test_redirect_rejects_https() {
        let err = parse_loopback_redirect("https://localhost:8765/callback").unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_redirect_rejects_non_loopback_host() {
        assert!(parse_loopback_redirect("http://example.com/callback").is_err());
        assert!(parse_loopback_redirect("http://192.168.1.5:8765/callback").is_err());
        // Other loopback-range addresses are not in the accepted set.
        assert!(parse_loopback_redirect("http://127.0.0.2:8765/callback").is_err());
    }

    #[test]
    fn test_redirect_rejects_garbage() {
        assert!(parse_loopback_redirect("not a url").is_err());
    }

    // -----------------------------------------------------------------------
    // validate()
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = AuthConfig {
            authorization_timeout_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("authorization_timeout"));
    }

    #[test]
    fn test_validate_rejects_zero_step_up_retries() {
        let config = AuthConfig {
            step_up_max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_allows_zero_retries_when_step_up_disabled() {
        let config = AuthConfig {
            enable_step_up_auth: false,
            step_up_max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_resource_uri() {
        let config = AuthConfig {
            resource_uri: "not-absolute".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_explicit_resource_uri() {
        let config = AuthConfig {
            resource_uri: "https://mcp.example.com/mcp".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
