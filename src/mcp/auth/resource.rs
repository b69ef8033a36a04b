//! Resource indicator canonicalization (RFC 8707)
//!
//! Tokens issued for an MCP server are bound to a *resource indicator*: a
//! stable identifier derived from the server endpoint URL. Two clients
//! pointing at the same server through cosmetically different URLs
//! (`HTTPS://Host:443/mcp/` vs `https://host/mcp`) must derive the same
//! indicator, otherwise the authorization server mints tokens for what it
//! believes are different audiences.
//!
//! Canonical form:
//!
//! - scheme and host lowercased
//! - default ports removed (`80` for `http`, `443` for `https`)
//! - no query, no fragment
//! - path stripped of its trailing slash, except when the path is exactly
//!   `/`
//! - IPv6 hosts keep their brackets

use url::Url;

use crate::error::{McprobeError, Result};

/// Derives the canonical RFC 8707 resource indicator for an MCP endpoint.
///
/// # Arguments
///
/// * `endpoint` - The MCP server endpoint URL as configured.
///
/// # Returns
///
/// The canonical resource identifier. Canonicalization is idempotent:
/// feeding the output back in returns the same value.
///
/// # Errors
///
/// Returns [`McprobeError::Config`] when the endpoint cannot be parsed as
/// an absolute URL, has no host, or uses a scheme other than `http` or
/// `https`.
///
/// # Examples
///
/// ```
/// use mcprobe::mcp::auth::resource::canonical_resource;
///
/// let uri = canonical_resource("HTTPS://MCP.Example.Com:443/mcp/").unwrap();
/// assert_eq!(uri.as_str(), "https://mcp.example.com/mcp");
///
/// let uri = canonical_resource("http://[::1]:8090/mcp").unwrap();
/// assert_eq!(uri.as_str(), "http://[::1]:8090/mcp");
/// ```
pub fn canonical_resource(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        McprobeError::Config(format!("endpoint is not an absolute URL: {endpoint:?} ({e})"))
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(McprobeError::Config(format!(
                "endpoint scheme must be http or https, got {other:?}"
            ))
            .into());
        }
    }

    if url.host_str().is_none() {
        return Err(McprobeError::Config(format!("endpoint has no host: {endpoint:?}")).into());
    }

    // The url crate already lowercases scheme and host and drops default
    // ports during parsing; what remains is trimming the path and clearing
    // query and fragment.
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path();
    if path != "/" && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            url.set_path("/");
        } else {
            url.set_path(&trimmed);
        }
    }

    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
