//! Registration access token injection for Dynamic Client Registration
//!
//! Some authorization servers protect their RFC 7591 registration endpoint
//! with an initial access token. This chain link attaches the configured
//! token as a bearer `Authorization` header -- but only to requests that
//! are unambiguously DCR requests, and only when it is safe to do so:
//!
//! - method must be `POST`
//! - the URL path (lowercased, trailing slash trimmed) must match a fixed
//!   allowlist of registration endpoint shapes, exactly or as a suffix
//! - the scheme must be `https`; sending a registration token over plain
//!   HTTP is refused before any request leaves the process
//! - the `Authorization` header must be empty; the link never overwrites
//!   an existing credential
//!
//! Paths that merely contain "register"/"registration" somewhere else
//! (`/user/registration-stats`, `/deregister-device`) do not match and
//! receive no token.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{McprobeError, Result};
use crate::mcp::auth::chain::{describe_request, RequestChain};

/// Registration endpoint path shapes that receive the token, matched
/// exactly or as a path suffix.
const REGISTRATION_PATHS: [&str; 9] = [
    "/register",
    "/registration",
    "/oauth/register",
    "/oauth2/register",
    "/connect/register",
    "/oauth/registration",
    "/oauth2/registration",
    "/connect/registration",
    "/.well-known/openid-registration",
];

// ---------------------------------------------------------------------------
// RegistrationLink
// ---------------------------------------------------------------------------

/// Chain link that attaches the registration access token to DCR requests.
pub struct RegistrationLink {
    token: Option<String>,
    next: Arc<dyn RequestChain>,
}

impl RegistrationLink {
    /// Creates the link.
    ///
    /// # Arguments
    ///
    /// * `token` - The configured registration access token; `None` or an
    ///   empty string turns the link into a pass-through.
    /// * `next` - The next chain stage.
    pub fn new(token: Option<String>, next: Arc<dyn RequestChain>) -> Self {
        let token = token.filter(|t| !t.is_empty());
        Self { token, next }
    }
}

#[async_trait]
impl RequestChain for RegistrationLink {
    async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let token = match &self.token {
            Some(token) => token,
            None => return self.next.execute(request).await,
        };

        if request.method() != reqwest::Method::POST
            || !is_registration_path(request.url().path())
        {
            return self.next.execute(request).await;
        }

        // Security preconditions short-circuit before any bytes are sent.
        if request.url().scheme() != "https" {
            return Err(McprobeError::RegistrationRefused(format!(
                "refusing to send registration token over {} ({})",
                request.url().scheme(),
                describe_request(&request)
            ))
            .into());
        }
        if request
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .is_some()
        {
            return Err(McprobeError::RegistrationRefused(format!(
                "request already carries an Authorization header ({})",
                describe_request(&request)
            ))
            .into());
        }

        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| {
                McprobeError::RegistrationRefused(
                    "registration token contains characters invalid in a header".to_string(),
                )
            })?;
        request
            .headers_mut()
            .insert(reqwest::header::AUTHORIZATION, value);

        self.next.execute(request).await
    }
}

/// Matches a path against the registration allowlist, exactly or as a
/// suffix, lowercased and with trailing slashes ignored.
fn is_registration_path(path: &str) -> bool {
    let normalized = path.to_ascii_lowercase();
    let normalized = normalized.trim_end_matches('/');
    let normalized = if normalized.is_empty() { "/" } else { normalized };

    REGISTRATION_PATHS
        .iter()
        .any(|pattern| normalized == *pattern || normalized.ends_with(pattern))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // is_registration_path -- matches
    // -----------------------------------------------------------------------

    #[test]
    fn test_matches_bare_patterns() {
        for pattern in REGISTRATION_PATHS {
            assert!(is_registration_path(pattern), "{pattern} must match itself");
        }
    }

    #[test]
    fn test_matches_as_suffix() {
        assert!(is_registration_path("/tenant1/oauth/register"));
        assert!(is_registration_path("/v2/connect/registration"));
        assert!(is_registration_path("/idp/.well-known/openid-registration"));
    }

    #[test]
    fn test_matches_ignore_case_and_trailing_slash() {
        assert!(is_registration_path("/OAuth2/Register"));
        assert!(is_registration_path("/register/"));
        assert!(is_registration_path("/oauth/registration//"));
    }

    // -----------------------------------------------------------------------
    // is_registration_path -- non-matches
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_paths_with_embedded_keywords() {
        assert!(!is_registration_path("/user/registration-stats"));
        assert!(!is_registration_path("/deregister-device"));
        assert!(!is_registration_path("/api/v1/user-registration"));
        assert!(!is_registration_path("/registered"));
        assert!(!is_registration_path("/preregister"));
    }

    #[test]
    fn test_rejects_unrelated_paths() {
        assert!(!is_registration_path("/"));
        assert!(!is_registration_path("/token"));
        assert!(!is_registration_path("/authorize"));
    }

    // -----------------------------------------------------------------------
    // Link behavior (in-process; wire behavior in tests/auth_chain_test.rs)
    // -----------------------------------------------------------------------

    struct Capture;

    #[async_trait]
    impl RequestChain for Capture {
        async fn execute(&self, _request: reqwest::Request) -> Result<reqwest::Response> {
            // The security-precondition tests below never reach this stage.
            Err(McprobeError::Internal("unexpected forward".to_string()).into())
        }
    }

    fn link(token: &str) -> RegistrationLink {
        RegistrationLink::new(Some(token.to_string()), Arc::new(Capture))
    }

    #[tokio::test]
    async fn test_refuses_plain_http_registration() {
        let request = reqwest::Request::new(
            reqwest::Method::POST,
            url::Url::parse("http://auth.internal/register").unwrap(),
        );
        let err = link("secret").execute(request).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("registration"), "unexpected error: {msg}");
        assert!(msg.contains("http"), "must name the scheme: {msg}");
    }

    #[tokio::test]
    async fn test_refuses_existing_authorization_header() {
        let mut request = reqwest::Request::new(
            reqwest::Method::POST,
            url::Url::parse("https://auth.example.com/register").unwrap(),
        );
        request.headers_mut().insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_static("Bearer existing"),
        );
        let err = link("secret").execute(request).await.unwrap_err();
        assert!(err.to_string().contains("Authorization header"));
    }
}
