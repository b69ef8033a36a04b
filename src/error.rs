//! Error types for mcprobe
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling. The authorization
//! subsystem reports every failure as one of the variants below so that
//! callers can distinguish, for example, a blocked metadata fetch from a
//! malformed challenge header without string matching.

use thiserror::Error;

/// Main error type for mcprobe operations
///
/// This enum encompasses all possible errors that can occur during
/// configuration loading, MCP protocol interactions, transport I/O, and the
/// OAuth 2.1 authorization flow.
#[derive(Error, Debug)]
pub enum McprobeError {
    /// Configuration-related errors (invalid redirect URL, bad scope mode,
    /// missing required field)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A `WWW-Authenticate` header could not be parsed
    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    /// A server-supplied URL was refused by the SSRF safety gate
    #[error("URL blocked for metadata fetch: {url} ({reason})")]
    SsrfBlocked {
        /// The URL that was refused
        url: String,
        /// Why the gate refused it
        reason: String,
    },

    /// A metadata document could not be fetched (non-200 status, wrong
    /// content type, oversize body, I/O failure, or timeout)
    #[error("Metadata fetch failed for {url}: {detail}")]
    MetadataFetch {
        /// The URL that was attempted
        url: String,
        /// What went wrong
        detail: String,
    },

    /// A metadata document was fetched but failed validation
    #[error("Invalid metadata from {url}: {detail}")]
    InvalidMetadata {
        /// The URL the document came from
        url: String,
        /// Which requirement it violated
        detail: String,
    },

    /// The authorization server does not advertise PKCE S256
    #[error("Authorization server {issuer} does not advertise PKCE S256 support")]
    PkceNotAdvertised {
        /// Issuer identifier of the offending server
        issuer: String,
    },

    /// The configured preferred authorization server is not in the
    /// protected resource metadata list
    #[error("Preferred authorization server not offered by resource: {preferred}")]
    PreferredAuthServerMissing {
        /// The configured `preferred_auth_server` value
        preferred: String,
    },

    /// Dynamic client registration was refused, either by the server or by
    /// a security precondition before any request was sent
    #[error("Client registration refused: {0}")]
    RegistrationRefused(String),

    /// The `state` parameter returned in the callback does not match the
    /// generated value (CSRF protection)
    #[error("State parameter mismatch in authorization callback")]
    StateMismatch,

    /// The authorization server returned an `error` parameter in the
    /// callback
    #[error("Authorization server error: {error}{}", .description.as_deref().map(|d| format!(" - {d}")).unwrap_or_default())]
    AuthorizationServerError {
        /// The OAuth error code
        error: String,
        /// Optional human-readable description
        description: Option<String>,
    },

    /// The user did not complete authorization within the configured window
    #[error("Authorization timed out after {waited_secs}s waiting for callback")]
    AuthorizationTimeout {
        /// Seconds waited before giving up
        waited_secs: u64,
    },

    /// The enclosing operation was cancelled while authorization was in
    /// flight
    #[error("Authorization cancelled")]
    AuthorizationCancelled,

    /// The server demands authorization; carries the raw `WWW-Authenticate`
    /// header value from the `401` response
    #[error("Authorization required: {challenge}")]
    AuthRequired {
        /// Raw `WWW-Authenticate` header value (may be empty)
        challenge: String,
    },

    /// A `403 insufficient_scope` response named no scopes to request
    #[error("Insufficient scope challenge without scope list from {endpoint}")]
    InsufficientScopeWithoutScopeList {
        /// The endpoint that produced the challenge
        endpoint: String,
    },

    /// The step-up retry ledger reached its cap for an endpoint
    #[error("Step-up authorization retries exhausted ({attempts} attempts) for {endpoint}")]
    MaxRetriesExceeded {
        /// Attempts recorded when the cap was hit
        attempts: u32,
        /// `METHOD host path` of the guarded endpoint
        endpoint: String,
    },

    /// A step-up replay was required but the original request body cannot
    /// be produced again
    #[error("Cannot replay request body for step-up retry to {endpoint}")]
    CannotReplayBody {
        /// `METHOD host path` of the request
        endpoint: String,
    },

    /// Step-up authorization required a user prompt that declined or is
    /// unavailable
    #[error("Step-up authorization declined: {0}")]
    UserDeclined(String),

    /// General MCP protocol error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// MCP transport-level I/O failure
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// The server invalidated the active MCP session
    #[error("MCP session expired")]
    SessionExpired,

    /// MCP request timed out
    #[error("MCP timeout: method={method}")]
    McpTimeout {
        /// JSON-RPC method that timed out
        method: String,
    },

    /// Internal runtime error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for mcprobe operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns the [`McprobeError`] inside an [`anyhow::Error`], if the chain
/// bottoms out in one.
///
/// Policy decisions in the authorization subsystem depend on the error
/// *kind* (discovery fallback swallows only metadata-fetch failures, the
/// reconnect classifier treats timeouts as transient), so a typed view of
/// an `anyhow::Error` is needed in a few places.
pub fn as_mcprobe_error(err: &anyhow::Error) -> Option<&McprobeError> {
    err.downcast_ref::<McprobeError>()
}
