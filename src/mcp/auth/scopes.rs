//! Scope selection for authorization requests
//!
//! Chooses which scopes an authorization request asks for. Two modes:
//!
//! - **auto** (default): scopes named by the `WWW-Authenticate` challenge
//!   win; otherwise the resource metadata's `scopes_supported`; otherwise
//!   the `scope` parameter is omitted entirely and the authorization
//!   server applies its own defaults.
//! - **manual**: the configured scope list is always used. When discovery
//!   disagrees a warning is logged, but the configured list still wins.
//!
//! The selector never merges scope sets on its own.

use std::collections::HashSet;

use crate::mcp::auth::challenge::BearerChallenge;
use crate::mcp::auth::config::{AuthConfig, ScopeSelectionMode};
use crate::mcp::auth::discovery::ProtectedResourceMetadata;

/// Selects the scopes for an authorization request.
///
/// Returns `None` when the `scope` parameter should be omitted from the
/// request. Order is preserved: challenge scopes come back exactly as the
/// challenge listed them, resource metadata scopes exactly as advertised.
///
/// # Arguments
///
/// * `config` - The authorization configuration (mode and manual list).
/// * `challenge` - The parsed challenge that triggered authorization, if
///   any.
/// * `prm` - Discovered protected resource metadata, if any.
pub fn select_scopes(
    config: &AuthConfig,
    challenge: Option<&BearerChallenge>,
    prm: Option<&ProtectedResourceMetadata>,
) -> Option<Vec<String>> {
    let challenge_scopes = challenge.map(|c| c.scopes.as_slice()).unwrap_or(&[]);
    let prm_scopes = prm
        .and_then(|m| m.scopes_supported.as_deref())
        .unwrap_or(&[]);

    match config.scope_selection_mode {
        ScopeSelectionMode::Manual => {
            let discovered: &[String] = if !challenge_scopes.is_empty() {
                challenge_scopes
            } else {
                prm_scopes
            };
            if !discovered.is_empty() && !same_scope_set(&config.scopes, discovered) {
                tracing::warn!(
                    configured = ?config.scopes,
                    discovered = ?discovered,
                    "manual scope selection differs from discovered scopes"
                );
            }
            if config.scopes.is_empty() {
                None
            } else {
                Some(config.scopes.clone())
            }
        }
        ScopeSelectionMode::Auto => {
            if !challenge_scopes.is_empty() {
                Some(challenge_scopes.to_vec())
            } else if !prm_scopes.is_empty() {
                Some(prm_scopes.to_vec())
            } else {
                None
            }
        }
    }
}

/// Set equality ignoring order and duplicates.
fn same_scope_set(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let b: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    a == b
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_with(scopes: &[&str]) -> BearerChallenge {
        BearerChallenge {
            scheme: "Bearer".to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn prm_with(scopes: Option<&[&str]>) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata {
            resource: "https://mcp.example.com/mcp".to_string(),
            authorization_servers: vec!["https://auth.example.com".to_string()],
            scopes_supported: scopes.map(|s| s.iter().map(|x| x.to_string()).collect()),
            bearer_methods_supported: None,
            resource_documentation: None,
        }
    }

    fn auto_config() -> AuthConfig {
        AuthConfig::default()
    }

    fn manual_config(scopes: &[&str]) -> AuthConfig {
        AuthConfig {
            scope_selection_mode: ScopeSelectionMode::Manual,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Auto mode priority
    // -----------------------------------------------------------------------

    #[test]
    fn test_auto_prefers_challenge_scopes() {
        let selected = select_scopes(
            &auto_config(),
            Some(&challenge_with(&["files:write", "files:read"])),
            Some(&prm_with(Some(&["other"]))),
        );
        assert_eq!(
            selected,
            Some(vec!["files:write".to_string(), "files:read".to_string()])
        );
    }

    #[test]
    fn test_auto_preserves_challenge_order() {
        let selected = select_scopes(
            &auto_config(),
            Some(&challenge_with(&["c", "a", "b"])),
            None,
        );
        assert_eq!(
            selected,
            Some(vec!["c".to_string(), "a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_auto_falls_back_to_prm_scopes() {
        let selected = select_scopes(
            &auto_config(),
            Some(&challenge_with(&[])),
            Some(&prm_with(Some(&["files:read", "files:write"]))),
        );
        assert_eq!(
            selected,
            Some(vec!["files:read".to_string(), "files:write".to_string()])
        );
    }

    #[test]
    fn test_auto_omits_when_nothing_discovered() {
        assert_eq!(select_scopes(&auto_config(), None, None), None);
        assert_eq!(
            select_scopes(
                &auto_config(),
                Some(&challenge_with(&[])),
                Some(&prm_with(None))
            ),
            None
        );
    }

    #[test]
    fn test_auto_ignores_configured_scopes() {
        // Auto mode never merges in the configured list.
        let config = AuthConfig {
            scopes: vec!["configured".to_string()],
            ..Default::default()
        };
        assert_eq!(select_scopes(&config, None, None), None);
    }

    // -----------------------------------------------------------------------
    // Manual mode
    // -----------------------------------------------------------------------

    #[test]
    fn test_manual_returns_configured_scopes() {
        let selected = select_scopes(
            &manual_config(&["admin"]),
            Some(&challenge_with(&["files:read"])),
            None,
        );
        assert_eq!(selected, Some(vec!["admin".to_string()]));
    }

    #[test]
    fn test_manual_wins_even_when_discovery_agrees_partially() {
        let selected = select_scopes(
            &manual_config(&["files:read", "admin"]),
            None,
            Some(&prm_with(Some(&["files:read"]))),
        );
        assert_eq!(
            selected,
            Some(vec!["files:read".to_string(), "admin".to_string()])
        );
    }

    #[test]
    fn test_manual_set_equality_ignores_order() {
        // Same set in different order: no divergence, configured returned.
        let selected = select_scopes(
            &manual_config(&["a", "b"]),
            Some(&challenge_with(&["b", "a"])),
            None,
        );
        assert_eq!(selected, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_manual_with_empty_configured_scopes_omits_parameter() {
        let selected = select_scopes(&manual_config(&[]), None, None);
        assert_eq!(selected, None);
    }
}
