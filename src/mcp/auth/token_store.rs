//! In-memory OAuth token storage
//!
//! Tokens obtained through the authorization flow live only for the
//! lifetime of the process; nothing is ever written to disk or to an OS
//! credential store. The store is shared between the transport (which
//! attaches the bearer token to outgoing requests) and the authorization
//! flow (which replaces the token after an exchange or a step-up).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// OAuthToken
// ---------------------------------------------------------------------------

/// A complete OAuth 2.1 token response.
///
/// Fields map directly to the token endpoint response defined in RFC 6749
/// and refined by OAuth 2.1. The `expires_at` field is a computed UTC
/// timestamp derived from the `expires_in` seconds returned by the server,
/// so expiry can be determined without another server round-trip.
///
/// # Examples
///
/// ```
/// use mcprobe::mcp::auth::token_store::OAuthToken;
///
/// let token = OAuthToken {
///     access_token: "my_access_token".to_string(),
///     token_type: "Bearer".to_string(),
///     expires_at: None,
///     refresh_token: None,
///     scope: None,
/// };
///
/// // A token with no expiry is never considered expired.
/// assert!(!token.is_expired());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// UTC timestamp at which the access token expires. `None` means the
    /// server did not report a lifetime and the token is treated as
    /// non-expiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Refresh token, when the server issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scope string the token was granted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl OAuthToken {
    /// Returns true when the access token's expiry timestamp has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Process-lifetime store for the current endpoint's token.
///
/// One mcprobe process debugs one MCP endpoint, so the store holds at most
/// one token. Replacing the token (after a step-up re-authorization, for
/// example) drops the previous one.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<OAuthToken>>,
}

impl TokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `token`, replacing any previous one.
    pub async fn save(&self, token: OAuthToken) {
        let mut guard = self.current.write().await;
        *guard = Some(token);
    }

    /// Returns a clone of the stored token, expired or not.
    pub async fn load(&self) -> Option<OAuthToken> {
        self.current.read().await.clone()
    }

    /// Returns the access token string when a non-expired token is stored.
    pub async fn access_token(&self) -> Option<String> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.access_token.clone())
    }

    /// Drops the stored token.
    pub async fn clear(&self) {
        let mut guard = self.current.write().await;
        *guard = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
