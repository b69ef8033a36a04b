//! URL safety gate for discovery fetches and browser launches
//!
//! Discovery follows URLs supplied by the server (`resource_metadata` in a
//! `WWW-Authenticate` challenge, issuer URLs in protected resource
//! metadata). Fetching an attacker-controlled URL from inside the client is
//! a server-side request forgery vector, so every such URL passes
//! [`check_metadata_url`] before any HTTP request is issued.
//!
//! Browser launches are less sensitive: the URL is handed to the user's
//! browser rather than fetched by this process, so [`check_browser_url`]
//! only requires an `http`/`https` scheme. The launch itself never passes
//! the URL through a shell.
//!
//! # Blocked ranges for metadata fetches
//!
//! - non-`http`/`https` schemes, missing hostnames
//! - the literal hostname `localhost`
//! - IPv4 loopback `127.0.0.0/8` and IPv6 loopback `::1`
//! - RFC 1918 private ranges (`10/8`, `172.16/12`, `192.168/16`)
//! - link-local `169.254.0.0/16` (which covers the cloud metadata
//!   endpoint `169.254.169.254`)
//! - `0.0.0.0/8`, multicast `224.0.0.0/4`, reserved `240.0.0.0/4`

use url::{Host, Url};

use crate::error::{McprobeError, Result};

// ---------------------------------------------------------------------------
// Metadata fetch gate
// ---------------------------------------------------------------------------

/// Policy applied to server-supplied URLs before a metadata fetch.
///
/// The production policy ([`MetadataGate::strict`], also the default)
/// enforces every rule in the module docs. [`MetadataGate::permissive`]
/// keeps the scheme and hostname requirements but allows loopback and
/// private ranges; it exists so tests can run discovery against mock
/// servers bound to `127.0.0.1` and must not be used for real traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataGate {
    allow_private_hosts: bool,
}

impl MetadataGate {
    /// The production policy: all network-range rules enforced.
    pub fn strict() -> Self {
        Self {
            allow_private_hosts: false,
        }
    }

    /// Scheme/host rules only; loopback and private ranges allowed. For
    /// tests against local mock servers.
    pub fn permissive() -> Self {
        Self {
            allow_private_hosts: true,
        }
    }

    /// Validates a URL before it is used for a metadata fetch.
    ///
    /// # Arguments
    ///
    /// * `url` - The candidate URL, typically taken from a server
    ///   response.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::SsrfBlocked`] naming the URL and the rule
    /// that refused it.
    pub fn check(&self, url: &Url) -> Result<()> {
        let refuse = |reason: &str| -> Result<()> {
            Err(McprobeError::SsrfBlocked {
                url: url.to_string(),
                reason: reason.to_string(),
            }
            .into())
        };

        match url.scheme() {
            "http" | "https" => {}
            other => return refuse(&format!("scheme {other:?} is not http or https")),
        }

        let host = match url.host() {
            Some(host) => host,
            None => return refuse("missing hostname"),
        };

        if self.allow_private_hosts {
            return Ok(());
        }

        match host {
            Host::Domain(name) => {
                if name.eq_ignore_ascii_case("localhost") {
                    return refuse("localhost is not allowed");
                }
            }
            Host::Ipv4(addr) => {
                if let Some(reason) = blocked_ipv4_reason(addr) {
                    return refuse(reason);
                }
            }
            Host::Ipv6(addr) => {
                if addr.is_loopback() {
                    return refuse("loopback address");
                }
                // IPv4-mapped IPv6 addresses smuggle an IPv4 target past
                // the IPv4 rules above.
                if let Some(mapped) = addr.to_ipv4_mapped() {
                    if let Some(reason) = blocked_ipv4_reason(mapped) {
                        return refuse(reason);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Validates a URL against the strict production policy.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use mcprobe::mcp::auth::gate::check_metadata_url;
///
/// let public = Url::parse("https://auth.example.com/.well-known/oauth-authorization-server").unwrap();
/// assert!(check_metadata_url(&public).is_ok());
///
/// let loopback = Url::parse("http://127.0.0.1:9000/meta").unwrap();
/// assert!(check_metadata_url(&loopback).is_err());
/// ```
pub fn check_metadata_url(url: &Url) -> Result<()> {
    MetadataGate::strict().check(url)
}

/// Returns the rule name that blocks `addr`, or `None` when the address is
/// routable.
fn blocked_ipv4_reason(addr: std::net::Ipv4Addr) -> Option<&'static str> {
    let octets = addr.octets();
    if addr.is_loopback() {
        Some("loopback address")
    } else if addr.is_private() {
        Some("private address range")
    } else if addr.is_link_local() {
        Some("link-local address range")
    } else if octets[0] == 0 {
        Some("0.0.0.0/8 address range")
    } else if addr.is_multicast() {
        Some("multicast address range")
    } else if octets[0] >= 240 {
        Some("reserved address range")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Browser launch gate
// ---------------------------------------------------------------------------

/// Validates a URL before it is opened in the user's browser.
///
/// Only the scheme is checked; the authorization endpoint is allowed to
/// live anywhere the user's browser can reach, including private networks.
///
/// # Errors
///
/// Returns [`McprobeError::SsrfBlocked`] when the scheme is not `http` or
/// `https` (e.g. `file:`, `javascript:`).
pub fn check_browser_url(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(McprobeError::SsrfBlocked {
            url: url.to_string(),
            reason: format!("scheme {other:?} cannot be opened in a browser"),
        }
        .into()),
    }
}

/// Attempts to open `url` in the user's default browser.
///
/// The platform opener binary is spawned directly with the URL as a single
/// argument; no shell is involved, so the URL cannot be interpreted as
/// shell syntax. Failures are intentionally ignored: the caller prints the
/// URL so the user can open it manually.
pub fn try_open_browser(url: &Url) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url.as_str()).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open")
            .arg(url.as_str())
            .spawn();
    }
    #[cfg(target_os = "windows")]
    {
        // rundll32 takes the URL as an argument vector entry, not a shell
        // string.
        let _ = std::process::Command::new("rundll32")
            .arg("url.dll,FileProtocolHandler")
            .arg(url.as_str())
            .spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = url;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
