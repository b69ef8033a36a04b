//! OAuth 2.1 / OIDC discovery
//!
//! This module implements RFC 9728 Protected Resource Metadata discovery
//! and RFC 8414 / OpenID Connect Discovery to locate authorization server
//! endpoints before running the authorization code flow.
//!
//! # Discovery sequence
//!
//! 1. The MCP client issues an unauthenticated request to the resource
//!    server.
//! 2. The server responds with `401 Unauthorized` and a `WWW-Authenticate`
//!    header that may carry a `resource_metadata` attribute pointing at the
//!    protected resource metadata document.
//! 3. [`fetch_protected_resource_metadata`] retrieves that document, or
//!    falls back to the RFC 9728 well-known URIs derived from the endpoint.
//! 4. The document lists one or more authorization servers;
//!    [`select_authorization_server`] picks one (honoring
//!    `preferred_auth_server`).
//! 5. [`fetch_authorization_server_metadata`] probes the RFC 8414 and OIDC
//!    well-known orderings for that issuer and validates the result.
//!
//! # Fetch semantics
//!
//! Every metadata request is a GET with `Accept: application/json` and a
//! fixed User-Agent, bounded by a 10-second timeout and a 1 MiB body cap.
//! The response must be `200` with a JSON content type. URLs supplied by
//! the server (the challenge `resource_metadata` value and all issuer
//! candidates) pass the SSRF gate in [`crate::mcp::auth::gate`] before any
//! request is made.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{as_mcprobe_error, McprobeError, Result};
use crate::mcp::auth::challenge::BearerChallenge;
use crate::mcp::auth::gate::MetadataGate;

/// User-Agent sent on every metadata and token request.
pub const USER_AGENT: &str = concat!("mcprobe/", env!("CARGO_PKG_VERSION"));

/// Hard timeout applied to each metadata fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on metadata document size.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Protected Resource Metadata (RFC 9728)
// ---------------------------------------------------------------------------

/// Metadata document describing a protected OAuth 2.1 resource.
///
/// Retrieved from the URL embedded in a `WWW-Authenticate:
/// Bearer resource_metadata=<url>` challenge or from the RFC 9728
/// well-known URIs.
///
/// # Examples
///
/// ```
/// use mcprobe::mcp::auth::discovery::ProtectedResourceMetadata;
///
/// let json = r#"{
///     "resource": "https://mcp.example.com/mcp",
///     "authorization_servers": ["https://auth.example.com"]
/// }"#;
///
/// let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.authorization_servers.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The URI of the protected resource itself.
    pub resource: String,

    /// Authorization server issuer URIs that protect this resource.
    pub authorization_servers: Vec<String>,

    /// OAuth scopes supported by this resource, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported methods for presenting bearer tokens (e.g. `"header"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,

    /// URL of human-readable documentation for the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
}

// ---------------------------------------------------------------------------
// Authorization Server Metadata (RFC 8414 / OIDC Discovery)
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth 2.1 / OIDC authorization server.
///
/// OpenID Connect discovery documents use the same field names for
/// everything this client consumes, so one structure covers both document
/// flavors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier URI for this authorization server.
    pub issuer: String,

    /// The URL of the authorization endpoint.
    pub authorization_endpoint: String,

    /// The URL of the token endpoint.
    pub token_endpoint: String,

    /// Optional URL of the Dynamic Client Registration endpoint (RFC 7591).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// OAuth scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// PKCE challenge methods the server supports (e.g. `["S256"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Whether the server accepts a client metadata document URL as the
    /// `client_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_metadata_document_supported: Option<bool>,

    /// Additional server metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Bounded JSON fetch
// ---------------------------------------------------------------------------

/// Fetches and parses one JSON metadata document with the bounded fetch
/// semantics described in the module docs.
///
/// # Errors
///
/// - [`McprobeError::MetadataFetch`] for transport failures, timeouts,
///   non-200 statuses, wrong content types, and oversize bodies. These are
///   the only errors discovery fallbacks swallow between probe attempts.
/// - [`McprobeError::InvalidMetadata`] when the body is not valid JSON.
/// - [`McprobeError::AuthorizationCancelled`] when `cancel` fires first.
async fn fetch_json_document(
    http: &reqwest::Client,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<serde_json::Value> {
    let fetch_err = |detail: String| McprobeError::MetadataFetch {
        url: url.to_string(),
        detail,
    };

    let request = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(FETCH_TIMEOUT);

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(McprobeError::AuthorizationCancelled.into()),
        result = request.send() => result.map_err(|e| fetch_err(e.to_string()))?,
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(fetch_err(format!("HTTP {status}")).into());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.to_ascii_lowercase().contains("application/json") {
        return Err(fetch_err(format!("unexpected content type {content_type:?}")).into());
    }

    let body = tokio::select! {
        _ = cancel.cancelled() => return Err(McprobeError::AuthorizationCancelled.into()),
        body = read_capped_body(response) => body.map_err(fetch_err)?,
    };

    serde_json::from_slice(&body).map_err(|e| {
        McprobeError::InvalidMetadata {
            url: url.to_string(),
            detail: format!("body is not valid JSON: {e}"),
        }
        .into()
    })
}

/// Reads the response body, failing hard when it exceeds [`MAX_BODY_BYTES`].
async fn read_capped_body(mut response: reqwest::Response) -> std::result::Result<Vec<u8>, String> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(format!("body exceeds {MAX_BODY_BYTES} byte limit"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Returns true when `err` is a metadata-fetch failure, the only class of
/// error that discovery swallows between probe attempts.
fn is_fetch_failure(err: &anyhow::Error) -> bool {
    matches!(as_mcprobe_error(err), Some(McprobeError::MetadataFetch { .. }))
}

// ---------------------------------------------------------------------------
// Protected resource metadata discovery
// ---------------------------------------------------------------------------

/// Fetches the RFC 9728 Protected Resource Metadata for an MCP endpoint.
///
/// Candidate URLs, first success wins:
///
/// 1. The `resource_metadata` URL from the challenge, when present. This
///    URL is server-supplied and must pass the SSRF gate; a gate refusal
///    is fatal, not a fallback.
/// 2. `<origin>/.well-known/oauth-protected-resource<path>` when the
///    endpoint has a non-root path.
/// 3. `<origin>/.well-known/oauth-protected-resource`.
///
/// Only fetch failures (non-200, timeout, wrong content type, oversize)
/// fall through to the next candidate; an invalid document is fatal. When
/// every candidate fails to fetch, the last fetch error is surfaced.
///
/// # Arguments
///
/// * `http` - Shared HTTP client.
/// * `endpoint` - The canonical MCP endpoint URL.
/// * `challenge` - The parsed challenge from the `401` response, if any.
/// * `gate` - Safety policy for server-supplied URLs.
/// * `cancel` - Cancellation token for the enclosing operation.
pub async fn fetch_protected_resource_metadata(
    http: &reqwest::Client,
    endpoint: &Url,
    challenge: Option<&BearerChallenge>,
    gate: &MetadataGate,
    cancel: &CancellationToken,
) -> Result<ProtectedResourceMetadata> {
    let mut last_fetch_error: Option<anyhow::Error> = None;

    // Candidate 1: the URL named by the challenge.
    if let Some(meta_url_str) = challenge.and_then(|c| c.resource_metadata.as_deref()) {
        let meta_url = Url::parse(meta_url_str).map_err(|e| McprobeError::InvalidMetadata {
            url: meta_url_str.to_string(),
            detail: format!("resource_metadata is not an absolute URL: {e}"),
        })?;
        gate.check(&meta_url)?;

        match fetch_json_document(http, &meta_url, cancel).await {
            Ok(doc) => return parse_protected_resource_metadata(doc, &meta_url),
            Err(e) if is_fetch_failure(&e) => {
                tracing::debug!("challenge metadata URL failed, falling back: {e}");
                last_fetch_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    // Candidates 2 and 3: well-known URIs derived from the (trusted,
    // user-configured) endpoint. These do not pass the SSRF gate so that
    // local debugging endpoints keep working.
    let path = endpoint.path().trim_end_matches('/');
    let mut candidates: Vec<Url> = Vec::new();
    if !path.is_empty() {
        candidates.push(well_known_url(
            endpoint,
            &format!("/.well-known/oauth-protected-resource{path}"),
        ));
    }
    candidates.push(well_known_url(endpoint, "/.well-known/oauth-protected-resource"));

    for candidate in candidates {
        match fetch_json_document(http, &candidate, cancel).await {
            Ok(doc) => return parse_protected_resource_metadata(doc, &candidate),
            Err(e) if is_fetch_failure(&e) => {
                tracing::debug!("resource metadata candidate {candidate} failed: {e}");
                last_fetch_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_fetch_error.unwrap_or_else(|| {
        McprobeError::MetadataFetch {
            url: endpoint.to_string(),
            detail: "no resource metadata candidates available".to_string(),
        }
        .into()
    }))
}

/// Builds `<origin><path>` from a base URL, dropping query and fragment.
fn well_known_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Deserializes and validates a protected resource metadata document.
fn parse_protected_resource_metadata(
    doc: serde_json::Value,
    source: &Url,
) -> Result<ProtectedResourceMetadata> {
    let invalid = |detail: String| McprobeError::InvalidMetadata {
        url: source.to_string(),
        detail,
    };

    let meta: ProtectedResourceMetadata =
        serde_json::from_value(doc).map_err(|e| invalid(e.to_string()))?;

    if meta.resource.is_empty() {
        return Err(invalid("resource field is empty".to_string()).into());
    }
    if meta.authorization_servers.is_empty() {
        return Err(invalid("authorization_servers is empty".to_string()).into());
    }
    for entry in &meta.authorization_servers {
        require_http_url("authorization_servers entry", entry, source)?;
    }

    Ok(meta)
}

/// Picks the authorization server to use from a validated metadata
/// document.
///
/// When `preferred` is non-empty the list must contain it (compared with
/// trailing slashes trimmed); otherwise the first entry is selected. A
/// plain-`http` selection is logged as a warning but not rejected, since
/// local debugging setups legitimately run authorization servers without
/// TLS.
///
/// # Errors
///
/// Returns [`McprobeError::PreferredAuthServerMissing`] when `preferred`
/// is set and absent from the list.
pub fn select_authorization_server(
    prm: &ProtectedResourceMetadata,
    preferred: &str,
) -> Result<Url> {
    let chosen = if preferred.is_empty() {
        // Validation guarantees at least one entry.
        prm.authorization_servers[0].clone()
    } else {
        let want = preferred.trim_end_matches('/');
        prm.authorization_servers
            .iter()
            .find(|s| s.trim_end_matches('/') == want)
            .cloned()
            .ok_or_else(|| McprobeError::PreferredAuthServerMissing {
                preferred: preferred.to_string(),
            })?
    };

    // Entries were URL-validated during parsing.
    let url = Url::parse(&chosen)?;
    if url.scheme() == "http" {
        tracing::warn!("selected authorization server {url} uses plain http");
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Authorization server metadata discovery
// ---------------------------------------------------------------------------

/// Fetches the authorization server metadata document for an issuer.
///
/// Probe order, first success wins:
///
/// - Issuer without a path:
///   1. `<origin>/.well-known/oauth-authorization-server`
///   2. `<origin>/.well-known/openid-configuration`
/// - Issuer with path `/p`:
///   1. `<origin>/.well-known/oauth-authorization-server/p`
///   2. `<origin>/.well-known/openid-configuration/p`
///   3. `<origin>/p/.well-known/openid-configuration`
///
/// Every candidate URL derives from the server-supplied issuer and passes
/// the SSRF gate. Only fetch failures fall through to the next candidate;
/// the last one is surfaced when all fail.
///
/// # Errors
///
/// [`McprobeError::InvalidMetadata`] when the issuer itself is not an
/// absolute `http`/`https` URL with a host, or a probed document fails
/// validation; [`McprobeError::SsrfBlocked`] when the gate refuses a
/// candidate; [`McprobeError::MetadataFetch`] when all probes fail.
pub async fn fetch_authorization_server_metadata(
    http: &reqwest::Client,
    issuer: &Url,
    gate: &MetadataGate,
    cancel: &CancellationToken,
) -> Result<AuthorizationServerMetadata> {
    if !matches!(issuer.scheme(), "http" | "https") || issuer.host_str().is_none() {
        return Err(McprobeError::InvalidMetadata {
            url: issuer.to_string(),
            detail: "issuer must be an absolute http(s) URL with a host".to_string(),
        }
        .into());
    }

    let candidates = build_asm_candidate_urls(issuer);
    let mut last_fetch_error: Option<anyhow::Error> = None;

    for candidate in &candidates {
        gate.check(candidate)?;

        match fetch_json_document(http, candidate, cancel).await {
            Ok(doc) => return parse_authorization_server_metadata(doc, candidate),
            Err(e) if is_fetch_failure(&e) => {
                tracing::debug!("authorization server metadata candidate {candidate} failed: {e}");
                last_fetch_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_fetch_error.unwrap_or_else(|| {
        McprobeError::MetadataFetch {
            url: issuer.to_string(),
            detail: "no authorization server metadata candidates available".to_string(),
        }
        .into()
    }))
}

/// Builds the well-known candidate URLs for an issuer, in probe order.
fn build_asm_candidate_urls(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/').to_string();

    if path.is_empty() {
        vec![
            well_known_url(issuer, "/.well-known/oauth-authorization-server"),
            well_known_url(issuer, "/.well-known/openid-configuration"),
        ]
    } else {
        vec![
            well_known_url(
                issuer,
                &format!("/.well-known/oauth-authorization-server{path}"),
            ),
            well_known_url(issuer, &format!("/.well-known/openid-configuration{path}")),
            well_known_url(issuer, &format!("{path}/.well-known/openid-configuration")),
        ]
    }
}

/// Deserializes and validates an authorization server metadata document.
fn parse_authorization_server_metadata(
    doc: serde_json::Value,
    source: &Url,
) -> Result<AuthorizationServerMetadata> {
    let meta: AuthorizationServerMetadata =
        serde_json::from_value(doc).map_err(|e| McprobeError::InvalidMetadata {
            url: source.to_string(),
            detail: e.to_string(),
        })?;

    require_http_url("issuer", &meta.issuer, source)?;
    require_http_url("authorization_endpoint", &meta.authorization_endpoint, source)?;
    require_http_url("token_endpoint", &meta.token_endpoint, source)?;
    if let Some(ref registration) = meta.registration_endpoint {
        require_http_url("registration_endpoint", registration, source)?;
    }

    Ok(meta)
}

/// Requires `value` to be an absolute `http`/`https` URL with a host.
fn require_http_url(field: &str, value: &str, source: &Url) -> Result<Url> {
    let invalid = |detail: String| McprobeError::InvalidMetadata {
        url: source.to_string(),
        detail,
    };

    let url = Url::parse(value)
        .map_err(|e| invalid(format!("{field} is not an absolute URL ({value:?}): {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("{field} must use http or https, got {value:?}")).into());
    }
    if url.host_str().is_none() {
        return Err(invalid(format!("{field} has no host: {value:?}")).into());
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
