//! Streamable HTTP/SSE transport
//!
//! [`HttpTransport`] speaks the MCP Streamable HTTP transport protocol:
//! every outbound JSON-RPC message is an HTTP POST to the endpoint, and
//! the server may reply with a direct `application/json` body, a
//! `text/event-stream` body carrying one or more messages, or `202
//! Accepted` for notifications.
//!
//! Every POST is executed through the authorization request chain, so
//! resource indicators, registration tokens, and step-up handling apply
//! uniformly, and a bearer token from the shared in-memory store is
//! attached when one is available.
//!
//! # Authorization signalling
//!
//! A `401 Unauthorized` response surfaces as
//! [`McprobeError::AuthRequired`] carrying the raw `WWW-Authenticate`
//! header value. The session layer reacts by running the authorization
//! flow and reconnecting; the transport itself never blocks on user
//! interaction.
//!
//! # Session management
//!
//! After a successful `initialize` POST the server may return an
//! `MCP-Session-Id` header. When present it is attached to every
//! subsequent POST. A `404` while a session is active means the server
//! expired the session. On drop, an active session is terminated with a
//! best-effort HTTP DELETE.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, RwLock};

use crate::error::{McprobeError, Result};
use crate::mcp::auth::chain::RequestChain;
use crate::mcp::auth::token_store::TokenStore;
use crate::mcp::transport::Transport;
use crate::mcp::types::PROTOCOL_VERSION;

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// Streamable HTTP/SSE transport routed through the authorization chain.
pub struct HttpTransport {
    chain: Arc<dyn RequestChain>,
    endpoint: url::Url,
    tokens: Arc<TokenStore>,
    request_timeout: Duration,
    session_id: Arc<RwLock<Option<String>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport for `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The MCP server URL.
    /// * `chain` - The outbound request chain (with or without the
    ///   step-up link).
    /// * `tokens` - Shared in-memory token store; a stored, non-expired
    ///   token is attached as `Authorization: Bearer`.
    /// * `request_timeout` - Per-request bound.
    pub fn new(
        endpoint: url::Url,
        chain: Arc<dyn RequestChain>,
        tokens: Arc<TokenStore>,
        request_timeout: Duration,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            chain,
            endpoint,
            tokens,
            request_timeout,
            session_id: Arc::new(RwLock::new(None)),
            last_event_id: Arc::new(RwLock::new(None)),
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    /// Builds one POST carrying a serialized JSON-RPC message.
    async fn build_post(&self, message: String) -> Result<reqwest::Request> {
        use reqwest::header;

        let mut request = reqwest::Request::new(reqwest::Method::POST, self.endpoint.clone());
        *request.timeout_mut() = Some(self.request_timeout);

        let headers = request.headers_mut();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(
            "MCP-Protocol-Version",
            header::HeaderValue::from_static(PROTOCOL_VERSION),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(crate::mcp::auth::discovery::USER_AGENT),
        );

        if let Some(session_id) = self.session_id.read().await.as_deref() {
            headers.insert(
                "MCP-Session-Id",
                header::HeaderValue::from_str(session_id).map_err(|_| {
                    McprobeError::McpTransport("session id is not header-safe".to_string())
                })?,
            );
        }
        if let Some(event_id) = self.last_event_id.read().await.as_deref() {
            if let Ok(value) = header::HeaderValue::from_str(event_id) {
                headers.insert("Last-Event-ID", value);
            }
        }
        if let Some(token) = self.tokens.access_token().await {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    McprobeError::McpTransport("access token is not header-safe".to_string())
                })?,
            );
        }

        *request.body_mut() = Some(reqwest::Body::from(message));
        Ok(request)
    }

    /// Dispatches a successful response body to the inbound stream.
    async fn dispatch_response(&self, response: reqwest::Response) -> Result<()> {
        // Capture the session id handed out on the initialize response.
        if let Some(session_id) = response
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let mut guard = self.session_id.write().await;
            guard.get_or_insert(session_id);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let inbound_tx = self.inbound_tx.clone();
            let last_event_id = Arc::clone(&self.last_event_id);
            tokio::spawn(async move {
                pump_sse_stream(byte_stream, inbound_tx, last_event_id).await;
            });
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| McprobeError::McpTransport(format!("failed to read body: {e}")))?;
            if !body.is_empty() {
                let _ = self.inbound_tx.send(body);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: String) -> Result<()> {
        let request = self.build_post(message).await?;
        let response = self.chain.execute(request).await?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(McprobeError::AuthRequired { challenge }.into());
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut session = self.session_id.write().await;
            if session.take().is_some() {
                return Err(McprobeError::SessionExpired.into());
            }
            return Err(McprobeError::McpTransport("HTTP 404 Not Found".to_string()).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(
                McprobeError::McpTransport(format!("HTTP POST returned status {status}")).into(),
            );
        }

        self.dispatch_response(response).await
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

impl Drop for HttpTransport {
    /// Terminates an active session with a best-effort synchronous DELETE.
    fn drop(&mut self) {
        let session_id = match self.session_id.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };

        if let Some(session_id) = session_id {
            let endpoint = self.endpoint.to_string();
            let _ = std::thread::spawn(move || {
                if let Ok(client) = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                {
                    let _ = client
                        .delete(&endpoint)
                        .header("MCP-Session-Id", session_id)
                        .send();
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// SSE parsing
// ---------------------------------------------------------------------------

/// One parsed Server-Sent Event.
#[derive(Debug, Default, PartialEq, Eq)]
struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    data: String,
}

impl SseEvent {
    /// Ping events and empty data frames carry no JSON-RPC payload.
    fn is_payload(&self) -> bool {
        if self
            .event
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("ping"))
        {
            return false;
        }
        !self.data.is_empty() && !self.data.eq_ignore_ascii_case("[ping]")
    }
}

/// Incremental SSE frame assembler.
///
/// Feed raw body text in with [`SseAssembler::push`]; complete events
/// (terminated by a blank line) come back out. Partial frames are held
/// until the terminator arrives in a later chunk.
#[derive(Debug, Default)]
struct SseAssembler {
    buffer: String,
}

impl SseAssembler {
    fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        loop {
            let boundary = match (self.buffer.find("\r\n\r\n"), self.buffer.find("\n\n")) {
                (Some(a), Some(b)) if a < b => (a, 4),
                (Some(a), None) => (a, 4),
                (_, Some(b)) => (b, 2),
                (None, None) => break,
            };
            let frame: String = self.buffer.drain(..boundary.0 + boundary.1).collect();
            events.push(parse_sse_frame(frame.trim_end()));
        }
        events
    }

    /// Flushes a trailing unterminated frame when the stream ends.
    fn finish(self) -> Option<SseEvent> {
        let trimmed = self.buffer.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(parse_sse_frame(trimmed))
        }
    }
}

/// Parses one SSE frame (the lines between blank-line separators).
fn parse_sse_frame(frame: &str) -> SseEvent {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event.id = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            event.event = Some(value.trim().to_string());
        }
        // `retry:` and comment lines (`:`) are intentionally ignored.
    }

    event.data = data_lines.join("\n");
    event
}

/// Drives an SSE byte stream, forwarding payload events to `inbound_tx`
/// and recording event ids for `Last-Event-ID` resumption.
async fn pump_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>>,
    inbound_tx: mpsc::UnboundedSender<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
) {
    use futures::StreamExt;

    let mut assembler = SseAssembler::default();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("SSE stream ended with error: {e}");
                break;
            }
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        for event in assembler.push(text) {
            deliver_sse_event(event, &inbound_tx, &last_event_id).await;
        }
    }

    if let Some(event) = assembler.finish() {
        deliver_sse_event(event, &inbound_tx, &last_event_id).await;
    }
}

async fn deliver_sse_event(
    event: SseEvent,
    inbound_tx: &mpsc::UnboundedSender<String>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    if let Some(id) = &event.id {
        let mut guard = last_event_id.write().await;
        *guard = Some(id.clone());
    }
    if event.is_payload() {
        let _ = inbound_tx.send(event.data);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // SseAssembler
    // -----------------------------------------------------------------------

    #[test]
    fn test_assembler_single_event() {
        let mut assembler = SseAssembler::default();
        let events = assembler.push("data: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"jsonrpc":"2.0"}"#);
    }

    #[test]
    fn test_assembler_two_events_in_one_chunk() {
        let mut assembler = SseAssembler::default();
        let events = assembler.push("data: first\n\ndata: second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn test_assembler_event_split_across_chunks() {
        let mut assembler = SseAssembler::default();
        assert!(assembler.push("data: par").is_empty());
        let events = assembler.push("tial\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_assembler_crlf_separators() {
        let mut assembler = SseAssembler::default();
        let events = assembler.push("data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_assembler_finish_flushes_trailing_frame() {
        let mut assembler = SseAssembler::default();
        assert!(assembler.push("data: tail").is_empty());
        let event = assembler.finish().unwrap();
        assert_eq!(event.data, "tail");
    }

    #[test]
    fn test_assembler_multi_line_data_joined() {
        let mut assembler = SseAssembler::default();
        let events = assembler.push("data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_frame_captures_id_and_event_type() {
        let event = parse_sse_frame("id: evt-42\nevent: message\ndata: payload");
        assert_eq!(event.id.as_deref(), Some("evt-42"));
        assert_eq!(event.event.as_deref(), Some("message"));
        assert_eq!(event.data, "payload");
    }

    // -----------------------------------------------------------------------
    // Payload filtering
    // -----------------------------------------------------------------------

    #[test]
    fn test_ping_event_type_is_not_payload() {
        let event = parse_sse_frame("event: ping\ndata: ignored");
        assert!(!event.is_payload());
    }

    #[test]
    fn test_ping_data_marker_is_not_payload() {
        let event = parse_sse_frame("data: [PING]");
        assert!(!event.is_payload());
    }

    #[test]
    fn test_empty_data_is_not_payload() {
        let event = parse_sse_frame("id: only-an-id");
        assert!(!event.is_payload());
    }

    #[test]
    fn test_regular_data_is_payload() {
        let event = parse_sse_frame("data: {\"jsonrpc\":\"2.0\"}");
        assert!(event.is_payload());
    }

    // -----------------------------------------------------------------------
    // pump_sse_stream
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pump_forwards_payloads_and_records_ids() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let last_event_id = Arc::new(RwLock::new(None));

        let body = b"id: e1\ndata: real\n\nevent: ping\ndata: skipped\n\n".to_vec();
        let stream = futures::stream::iter(vec![reqwest::Result::Ok(bytes::Bytes::from(body))]);

        pump_sse_stream(stream, tx, Arc::clone(&last_event_id)).await;

        assert_eq!(rx.try_recv().unwrap(), "real");
        assert!(rx.try_recv().is_err(), "ping must be dropped");
        assert_eq!(last_event_id.read().await.as_deref(), Some("e1"));
    }

    // Wire behavior (401 surfacing, session headers, bearer attachment)
    // is covered by the wiremock tests in tests/mcp_client_test.rs.
}
