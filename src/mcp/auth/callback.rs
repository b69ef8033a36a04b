//! Loopback callback server for the authorization code flow
//!
//! Native clients receive the authorization response on a short-lived HTTP
//! listener bound to the loopback interface (the `http://localhost:PORT/..`
//! redirect form). This server is scoped to a single authorization
//! attempt: the flow binds it, waits for one result, and shuts it down on
//! every exit path.
//!
//! Behavior:
//!
//! - exactly one path is served (the redirect URL's path); anything else
//!   receives `404`
//! - only `GET` is accepted; other methods receive `405`
//! - the first value of each query parameter is collected into a map and
//!   delivered on a capacity-1 channel; only the first delivery counts,
//!   duplicates are logged and dropped
//! - the browser always gets a small HTML page, success or failure
//! - per-connection read and write timeouts of 10 s; the accept loop wakes
//!   at least every 30 s so shutdown is never blocked on a quiet socket

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

use crate::error::{McprobeError, Result};

/// Per-connection bound on reading the request head.
const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Per-connection bound on writing the response.
const WRITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Accept-loop wake interval; bounds how long a shutdown can lag.
const IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Grace period for the listener task to wind down during shutdown.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Upper bound on the request head we are willing to buffer.
const MAX_REQUEST_HEAD: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// CallbackOutcome
// ---------------------------------------------------------------------------

/// The authorization response delivered by the browser redirect.
///
/// Both variants carry the full first-value query parameter map; the
/// variant records whether the server rendered the failure page (an
/// `error` parameter was present). Validation of `state`, `error`, and
/// `code` is the flow's job.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Redirect without an `error` parameter.
    Success(HashMap<String, String>),
    /// Redirect carrying an `error` parameter.
    Error(HashMap<String, String>),
}

impl CallbackOutcome {
    /// The parameter map, whichever page was rendered.
    pub fn params(&self) -> &HashMap<String, String> {
        match self {
            CallbackOutcome::Success(params) | CallbackOutcome::Error(params) => params,
        }
    }
}

// ---------------------------------------------------------------------------
// CallbackServer
// ---------------------------------------------------------------------------

/// A bound loopback listener waiting for one authorization response.
pub struct CallbackServer {
    effective_redirect: Url,
    result_rx: mpsc::Receiver<CallbackOutcome>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Binds the listener described by a validated loopback redirect URL.
    ///
    /// A port of `0` asks the OS for a free port; the effective redirect
    /// URL (with the real port) is what must be sent to the authorization
    /// server.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Config`] when the URL has no usable host
    /// and I/O errors from binding.
    pub async fn bind(redirect_url: &Url) -> Result<CallbackServer> {
        let ip: IpAddr = match redirect_url.host() {
            Some(Host::Domain(name)) if name.eq_ignore_ascii_case("localhost") => {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
            Some(Host::Ipv4(addr)) => IpAddr::V4(addr),
            Some(Host::Ipv6(addr)) => IpAddr::V6(addr),
            _ => {
                return Err(McprobeError::Config(format!(
                    "redirect_url host is not bindable: {redirect_url}"
                ))
                .into());
            }
        };
        let port = redirect_url.port_or_known_default().unwrap_or(0);

        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await.map_err(|e| {
            McprobeError::Config(format!("failed to bind callback listener on {ip}:{port}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;

        let mut effective_redirect = redirect_url.clone();
        effective_redirect
            .set_port(Some(local_addr.port()))
            .map_err(|_| McprobeError::Internal("cannot set port on redirect URL".to_string()))?;

        let path = normalized_path(redirect_url.path());
        let (result_tx, result_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            path,
            result_tx,
            shutdown.clone(),
        ));

        Ok(CallbackServer {
            effective_redirect,
            result_rx,
            shutdown,
            task,
        })
    }

    /// The redirect URL with the actually-bound port.
    pub fn redirect_url(&self) -> &Url {
        &self.effective_redirect
    }

    /// Waits for the authorization response. Returns `None` only if the
    /// server task dropped the channel, which means shutdown already ran.
    pub async fn recv(&mut self) -> Option<CallbackOutcome> {
        self.result_rx.recv().await
    }

    /// Stops the listener, waiting up to the grace period for the task to
    /// finish. Independent of any parent cancellation so shutdown
    /// completes even when the flow itself was cancelled.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            tracing::warn!("callback server did not stop within the grace period");
        }
    }
}

/// Trims trailing slashes so `/callback` and `/callback/` serve the same
/// path; bare `/` stays `/`.
fn normalized_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    path: String,
    result_tx: mpsc::Sender<CallbackOutcome>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = tokio::time::timeout(IDLE_TIMEOUT, listener.accept()) => accepted,
        };

        match accepted {
            // Idle window passed with no connection; loop so shutdown and
            // the next accept both stay responsive.
            Err(_) => continue,
            Ok(Err(e)) => {
                tracing::warn!("callback listener accept failed: {e}");
                continue;
            }
            Ok(Ok((stream, peer))) => {
                if let Err(e) = handle_connection(stream, &path, &result_tx).await {
                    tracing::debug!("callback connection from {peer} failed: {e}");
                }
            }
        }
    }
}

/// Serves one browser connection.
async fn handle_connection(
    mut stream: TcpStream,
    expected_path: &str,
    result_tx: &mpsc::Sender<CallbackOutcome>,
) -> Result<()> {
    let head = tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream))
        .await
        .map_err(|_| McprobeError::McpTransport("callback read timed out".to_string()))??;

    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("/");

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let response = if method != "GET" {
        http_response(405, "Method Not Allowed", PAGE_METHOD_NOT_ALLOWED)
    } else if normalized_path(path) != expected_path {
        http_response(404, "Not Found", PAGE_NOT_FOUND)
    } else {
        let params = first_value_params(query);
        let outcome = if params.contains_key("error") {
            CallbackOutcome::Error(params)
        } else {
            CallbackOutcome::Success(params)
        };
        let page = match &outcome {
            CallbackOutcome::Success(_) => PAGE_SUCCESS,
            CallbackOutcome::Error(_) => PAGE_FAILURE,
        };

        // Capacity-1 channel: only the first delivery counts.
        if result_tx.try_send(outcome).is_err() {
            tracing::debug!("duplicate authorization callback dropped");
        }

        http_response(200, "OK", page)
    };

    tokio::time::timeout(WRITE_TIMEOUT, stream.write_all(response.as_bytes()))
        .await
        .map_err(|_| McprobeError::McpTransport("callback write timed out".to_string()))??;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Reads until the blank line terminating the HTTP request head.
async fn read_request_head(stream: &mut TcpStream) -> Result<String> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_REQUEST_HEAD {
            return Err(
                McprobeError::McpTransport("callback request head too large".to_string()).into(),
            );
        }
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.windows(2).any(|w| w == b"\n\n")
        {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Collects the first value of each query parameter, percent-decoded.
fn first_value_params(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

fn http_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

const PAGE_SUCCESS: &str = "<!DOCTYPE html><html><head><title>mcprobe</title></head>\
<body><h1>Authorization complete</h1><p>You may close this tab and return to mcprobe.</p></body></html>";

const PAGE_FAILURE: &str = "<!DOCTYPE html><html><head><title>mcprobe</title></head>\
<body><h1>Authorization failed</h1><p>The authorization server reported an error. \
You may close this tab; details are in the mcprobe terminal.</p></body></html>";

const PAGE_NOT_FOUND: &str =
    "<!DOCTYPE html><html><body><h1>404 Not Found</h1></body></html>";

const PAGE_METHOD_NOT_ALLOWED: &str =
    "<!DOCTYPE html><html><body><h1>405 Method Not Allowed</h1></body></html>";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
