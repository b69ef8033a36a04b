//! Transport-agnostic JSON-RPC client and the typed MCP session facade
//!
//! Two layers live here:
//!
//! - [`JsonRpcClient`] -- request/response correlation over a
//!   [`Transport`], plus routing of server notifications into a bounded
//!   queue (the producer blocks rather than drops).
//! - [`McpClient`] -- the typed MCP surface the rest of the program uses:
//!   `initialize`, `tools/list`, `tools/call`, `resources/list`,
//!   `resources/read`, `prompts/list`, `prompts/get`, notification
//!   handlers, and `close`.
//!
//! # Reconnection
//!
//! A call that fails with a *transient* condition -- a cancellation-like
//! condition, a network timeout, or an error whose message contains one of
//! the substrings in [`TRANSIENT_ERROR_SUBSTRINGS`] -- is retried exactly
//! once, after the client closes the existing session and re-runs the full
//! connect-and-initialize sequence. That sequence re-enters the
//! authorization flow when the server demands it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{as_mcprobe_error, McprobeError, Result};
use crate::mcp::auth::challenge::BearerChallenge;
use crate::mcp::auth::flow::AuthFlow;
use crate::mcp::transport::Transport;
use crate::mcp::types::*;

/// Depth of the notification queue between the transport reader and the
/// dispatcher. The reader blocks when it fills; notifications are never
/// dropped.
const NOTIFICATION_QUEUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Transient-error classification
// ---------------------------------------------------------------------------

/// Error-message substrings that mark a failure as transient.
///
/// Matching is on the rendered error chain, lowercased. Downstream retry
/// behavior depends on this exact set.
pub const TRANSIENT_ERROR_SUBSTRINGS: [&str; 5] = [
    "connection refused",
    "connection reset by peer",
    "transport is closing",
    "broken pipe",
    "unexpected eof",
];

/// Classifies an error as transient (worth one reconnect-and-retry).
///
/// Transient conditions are request timeouts ([`McprobeError::McpTimeout`]),
/// cancellation-like failures, and transport errors whose message contains
/// one of [`TRANSIENT_ERROR_SUBSTRINGS`].
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    if matches!(as_mcprobe_error(err), Some(McprobeError::McpTimeout { .. })) {
        return true;
    }

    // `{:#}` renders the whole anyhow chain, so an io::Error cause buried
    // under a reqwest wrapper still matches.
    let message = format!("{err:#}").to_ascii_lowercase();
    if message.contains("timed out") || message.contains("canceled") || message.contains("cancelled")
    {
        return true;
    }
    TRANSIENT_ERROR_SUBSTRINGS
        .iter()
        .any(|needle| message.contains(needle))
}

// ---------------------------------------------------------------------------
// JsonRpcClient
// ---------------------------------------------------------------------------

/// Request/response correlation over a [`Transport`].
pub struct JsonRpcClient {
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl JsonRpcClient {
    /// Creates the client and spawns its reader task.
    ///
    /// The reader routes responses to their waiting requests and forwards
    /// notifications into `notifications_tx`, blocking when the queue is
    /// full. It stops when the transport stream ends or `cancel` fires.
    pub fn new(
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
        notifications_tx: mpsc::Sender<JsonRpcNotification>,
        cancel: CancellationToken,
    ) -> Self {
        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn({
            let transport = Arc::clone(&transport);
            let pending = Arc::clone(&pending);
            async move {
                let mut stream = transport.receive();
                loop {
                    let raw = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = stream.next() => match item {
                            Some(raw) => raw,
                            None => break,
                        },
                    };

                    match InboundMessage::parse(&raw) {
                        Some(InboundMessage::Response(response)) => {
                            let key = id_key(&response.id);
                            let sender = pending.lock().await.remove(&key);
                            match sender {
                                Some(sender) => {
                                    let _ = sender.send(response);
                                }
                                None => {
                                    tracing::debug!("response for unknown request id {key}");
                                }
                            }
                        }
                        Some(InboundMessage::Notification(notification)) => {
                            // Bounded queue; block rather than drop, but
                            // give up when the session is being torn down.
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                sent = notifications_tx.send(notification) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        None => {
                            tracing::debug!("discarding unparseable inbound message");
                        }
                    }
                }
            }
        });

        Self {
            transport,
            pending,
            request_timeout,
            reader,
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// [`McprobeError::McpTimeout`] when no response arrives within the
    /// request timeout; [`McprobeError::Mcp`] when the server answers with
    /// a JSON-RPC error; transport errors otherwise.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let key = id_key(&request.id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(key.clone(), tx);

        let payload = serde_json::to_string(&request)?;
        if let Err(e) = self.transport.send(payload).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&key);
                return Err(McprobeError::McpTimeout {
                    method: method.to_string(),
                }
                .into());
            }
            Ok(Err(_closed)) => {
                return Err(McprobeError::McpTransport(
                    "transport is closing".to_string(),
                )
                .into());
            }
            Ok(Ok(response)) => response,
        };

        if let Some(error) = response.error {
            return Err(McprobeError::Mcp(format!(
                "{method} failed: {} (code {})",
                error.message, error.code
            ))
            .into());
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Sends a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send(serde_json::to_string(&notification)?).await
    }

    /// Stops the reader task. Pending requests observe a closed channel.
    pub fn close(&self) {
        self.reader.abort();
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Stable map key for a JSON-RPC id value.
fn id_key(id: &serde_json::Value) -> String {
    id.to_string()
}

// ---------------------------------------------------------------------------
// TransportConnector
// ---------------------------------------------------------------------------

/// Builds a fresh transport for each (re)connection attempt.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Establishes a new transport.
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}

/// Connector producing [`HttpTransport`]s over the shared chain and token
/// store.
///
/// [`HttpTransport`]: crate::mcp::transport::http::HttpTransport
pub struct HttpConnector {
    endpoint: url::Url,
    chain: Arc<dyn crate::mcp::auth::chain::RequestChain>,
    tokens: Arc<crate::mcp::auth::token_store::TokenStore>,
    request_timeout: Duration,
}

impl HttpConnector {
    /// Creates the connector.
    pub fn new(
        endpoint: url::Url,
        chain: Arc<dyn crate::mcp::auth::chain::RequestChain>,
        tokens: Arc<crate::mcp::auth::token_store::TokenStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            chain,
            tokens,
            request_timeout,
        }
    }
}

#[async_trait]
impl TransportConnector for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(crate::mcp::transport::http::HttpTransport::new(
            self.endpoint.clone(),
            Arc::clone(&self.chain),
            Arc::clone(&self.tokens),
            self.request_timeout,
        )))
    }
}

// ---------------------------------------------------------------------------
// McpClient
// ---------------------------------------------------------------------------

/// Callback invoked for every server notification, after cache upkeep.
pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// Cached listing state, written on initial list calls and invalidated by
/// list-changed notifications.
#[derive(Debug, Default)]
struct ListingCaches {
    tools: RwLock<Option<Vec<Tool>>>,
    resources: RwLock<Option<Vec<McpResource>>>,
    prompts: RwLock<Option<Vec<Prompt>>>,
}

struct SessionState {
    rpc: JsonRpcClient,
    init: InitializeResult,
}

/// The typed MCP client facade.
///
/// Owns the connection lifecycle: connect-and-initialize (re-entering the
/// authorization flow when the server demands it), the per-call
/// reconnect-once policy, listing caches, and the notification dispatcher.
pub struct McpClient {
    connector: Arc<dyn TransportConnector>,
    auth: Option<Arc<AuthFlow>>,
    request_timeout: Duration,
    cancel: CancellationToken,
    notifications_tx: mpsc::Sender<JsonRpcNotification>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
    caches: Arc<ListingCaches>,
    state: RwLock<Option<SessionState>>,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient").finish_non_exhaustive()
    }
}

impl McpClient {
    /// Connects to the server and completes the `initialize` handshake.
    ///
    /// When the transport reports that authorization is required, the
    /// authorization flow runs (driven by the challenge from the `401`)
    /// and the handshake is retried once with the obtained token.
    ///
    /// # Arguments
    ///
    /// * `connector` - Transport factory, reused on reconnects.
    /// * `auth` - The authorization flow, when authorization is enabled.
    /// * `request_timeout` - Per-request bound for RPC calls.
    /// * `cancel` - Cancellation token for the whole session.
    pub async fn connect(
        connector: Arc<dyn TransportConnector>,
        auth: Option<Arc<AuthFlow>>,
        request_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (notifications_tx, notifications_rx) =
            mpsc::channel::<JsonRpcNotification>(NOTIFICATION_QUEUE_DEPTH);
        let handler: Arc<RwLock<Option<NotificationHandler>>> = Arc::new(RwLock::new(None));
        let caches = Arc::new(ListingCaches::default());

        let dispatcher = tokio::spawn(dispatch_notifications(
            notifications_rx,
            Arc::clone(&caches),
            Arc::clone(&handler),
            cancel.clone(),
        ));

        let client = Self {
            connector,
            auth,
            request_timeout,
            cancel,
            notifications_tx,
            handler,
            caches,
            state: RwLock::new(None),
            dispatcher,
        };

        client.establish().await?;
        Ok(client)
    }

    /// Runs the connect-and-initialize sequence, entering the
    /// authorization flow at most once when the server demands it.
    async fn establish(&self) -> Result<()> {
        match self.try_establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let challenge_header = match as_mcprobe_error(&e) {
                    Some(McprobeError::AuthRequired { challenge }) => Some(challenge.clone()),
                    _ => None,
                };
                let Some(challenge_header) = challenge_header else {
                    return Err(e);
                };
                let auth = self
                    .auth
                    .as_ref()
                    .ok_or_else(|| {
                        McprobeError::Config(
                            "server requires authorization but authorization is disabled"
                                .to_string(),
                        )
                    })?;

                let challenge = BearerChallenge::parse(&challenge_header).ok();
                auth.authorize(challenge.as_ref(), None).await?;
                self.try_establish().await
            }
        }
    }

    async fn try_establish(&self) -> Result<()> {
        let transport = self.connector.connect().await?;
        let rpc = JsonRpcClient::new(
            transport,
            self.request_timeout,
            self.notifications_tx.clone(),
            self.cancel.child_token(),
        );

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "mcprobe".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let raw = rpc
            .request(METHOD_INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid initialize result: {e}")))?;
        rpc.notify(METHOD_INITIALIZED, None).await?;

        tracing::info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "MCP session established"
        );

        let mut state = self.state.write().await;
        if let Some(old) = state.take() {
            old.rpc.close();
        }
        *state = Some(SessionState { rpc, init });
        Ok(())
    }

    /// Closes the current session and runs the full
    /// connect-and-initialize sequence again.
    async fn reconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if let Some(old) = state.take() {
                old.rpc.close();
            }
        }
        self.caches.invalidate_all().await;
        self.establish().await
    }

    /// Issues one request on the current session.
    async fn request_once(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let state = self.state.read().await;
        let state = state
            .as_ref()
            .ok_or_else(|| McprobeError::Mcp("session is closed".to_string()))?;
        state.rpc.request(method, params).await
    }

    /// Issues a request with the session-level retry policies applied:
    /// one authorization round-trip on `401`, one reconnect on a
    /// transient failure.
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let first = self.request_once(method, params.clone()).await;
        let err = match first {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let auth_challenge = match as_mcprobe_error(&err) {
            Some(McprobeError::AuthRequired { challenge }) => Some(challenge.clone()),
            _ => None,
        };
        if let Some(header) = auth_challenge {
            let Some(auth) = self.auth.as_ref() else {
                return Err(err);
            };
            let challenge = BearerChallenge::parse(&header).ok();
            auth.authorize(challenge.as_ref(), None).await?;
            return self.request_once(method, params).await;
        }

        if is_transient_error(&err) {
            tracing::warn!(method, error = %err, "transient failure, reconnecting once");
            self.reconnect().await?;
            return self.request_once(method, params).await;
        }

        Err(err)
    }

    // -----------------------------------------------------------------------
    // Typed operations
    // -----------------------------------------------------------------------

    /// Server capabilities from the `initialize` handshake.
    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        let state = self.state.read().await;
        state.as_ref().map(|s| s.init.capabilities.clone())
    }

    /// Server name/version from the `initialize` handshake.
    pub async fn server_info(&self) -> Option<Implementation> {
        let state = self.state.read().await;
        state.as_ref().map(|s| s.init.server_info.clone())
    }

    /// Lists tools, refreshing the cache.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let raw = self.call(METHOD_TOOLS_LIST, None).await?;
        let result: ListToolsResult = serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid tools/list result: {e}")))?;
        *self.caches.tools.write().await = Some(result.tools.clone());
        Ok(result.tools)
    }

    /// Cached tools from the last `list_tools`, if still valid.
    pub async fn cached_tools(&self) -> Option<Vec<Tool>> {
        self.caches.tools.read().await.clone()
    }

    /// Invokes a tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let raw = self.call(METHOD_TOOLS_CALL, Some(params)).await?;
        serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid tools/call result: {e}")).into())
    }

    /// Lists resources, refreshing the cache.
    pub async fn list_resources(&self) -> Result<Vec<McpResource>> {
        let raw = self.call(METHOD_RESOURCES_LIST, None).await?;
        let result: ListResourcesResult = serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid resources/list result: {e}")))?;
        *self.caches.resources.write().await = Some(result.resources.clone());
        Ok(result.resources)
    }

    /// Cached resources from the last `list_resources`, if still valid.
    pub async fn cached_resources(&self) -> Option<Vec<McpResource>> {
        self.caches.resources.read().await.clone()
    }

    /// Reads a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let params = serde_json::json!({ "uri": uri });
        let raw = self.call(METHOD_RESOURCES_READ, Some(params)).await?;
        serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid resources/read result: {e}")).into())
    }

    /// Lists prompts, refreshing the cache.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let raw = self.call(METHOD_PROMPTS_LIST, None).await?;
        let result: ListPromptsResult = serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid prompts/list result: {e}")))?;
        *self.caches.prompts.write().await = Some(result.prompts.clone());
        Ok(result.prompts)
    }

    /// Cached prompts from the last `list_prompts`, if still valid.
    pub async fn cached_prompts(&self) -> Option<Vec<Prompt>> {
        self.caches.prompts.read().await.clone()
    }

    /// Renders a prompt by name.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<GetPromptResult> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        let raw = self.call(METHOD_PROMPTS_GET, Some(params)).await?;
        serde_json::from_value(raw)
            .map_err(|e| McprobeError::Mcp(format!("invalid prompts/get result: {e}")).into())
    }

    /// Registers the notification handler; replaces any previous one.
    pub async fn on_notification(&self, handler: NotificationHandler) {
        *self.handler.write().await = Some(handler);
    }

    /// Closes the session and stops background tasks.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if let Some(state) = state.take() {
            state.rpc.close();
        }
        self.cancel.cancel();
        self.dispatcher.abort();
    }
}

impl ListingCaches {
    async fn invalidate_all(&self) {
        *self.tools.write().await = None;
        *self.resources.write().await = None;
        *self.prompts.write().await = None;
    }
}

/// Consumes the notification queue: keeps listing caches honest, then
/// hands the notification to the registered handler.
async fn dispatch_notifications(
    mut notifications_rx: mpsc::Receiver<JsonRpcNotification>,
    caches: Arc<ListingCaches>,
    handler: Arc<RwLock<Option<NotificationHandler>>>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            item = notifications_rx.recv() => match item {
                Some(notification) => notification,
                None => break,
            },
        };

        match notification.method.as_str() {
            NOTIFICATION_TOOLS_CHANGED => *caches.tools.write().await = None,
            NOTIFICATION_RESOURCES_CHANGED => *caches.resources.write().await = None,
            NOTIFICATION_PROMPTS_CHANGED => *caches.prompts.write().await = None,
            _ => {}
        }

        let handler = handler.read().await.clone();
        if let Some(handler) = handler {
            handler(notification);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::fake::FakeTransport;

    fn rpc_over(
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> (JsonRpcClient, mpsc::Receiver<JsonRpcNotification>) {
        let (tx, rx) = mpsc::channel(8);
        let client = JsonRpcClient::new(transport, timeout, tx, CancellationToken::new());
        (client, rx)
    }

    // -----------------------------------------------------------------------
    // is_transient_error
    // -----------------------------------------------------------------------

    #[test]
    fn test_transient_matches_fixed_substrings() {
        for needle in TRANSIENT_ERROR_SUBSTRINGS {
            let err = anyhow::anyhow!(McprobeError::McpTransport(format!("io failure: {needle}")));
            assert!(is_transient_error(&err), "{needle} must be transient");
        }
    }

    #[test]
    fn test_transient_matches_timeout_kind() {
        let err = anyhow::anyhow!(McprobeError::McpTimeout {
            method: "tools/list".to_string()
        });
        assert!(is_transient_error(&err));
    }

    #[test]
    fn test_transient_matches_nested_cause() {
        let cause = anyhow::anyhow!("connection reset by peer");
        let err = cause.context("sending request");
        assert!(is_transient_error(&err));
    }

    #[test]
    fn test_transient_rejects_other_errors() {
        assert!(!is_transient_error(&anyhow::anyhow!(
            McprobeError::StateMismatch
        )));
        assert!(!is_transient_error(&anyhow::anyhow!("permission denied")));
        let err = anyhow::anyhow!(McprobeError::AuthRequired {
            challenge: "Bearer".to_string()
        });
        assert!(!is_transient_error(&err));
    }

    #[test]
    fn test_transient_matching_is_case_insensitive() {
        let err = anyhow::anyhow!("Connection Refused");
        assert!(is_transient_error(&err));
    }

    // -----------------------------------------------------------------------
    // JsonRpcClient request/response correlation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_request_resolves_with_matching_response() {
        let (transport, mut handle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (rpc, _notifications) = rpc_over(Arc::clone(&transport), Duration::from_secs(2));

        let responder = tokio::spawn(async move {
            let sent = handle.sent_rx.recv().await.unwrap();
            let request: serde_json::Value = serde_json::from_str(&sent).unwrap();
            handle.respond(serde_json::json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": { "ok": true }
            }));
            handle
        });

        let result = rpc.request("ping", None).await.unwrap();
        assert_eq!(result["ok"], true);
        let _ = responder.await;
    }

    #[tokio::test]
    async fn test_request_maps_jsonrpc_error() {
        let (transport, mut handle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (rpc, _notifications) = rpc_over(Arc::clone(&transport), Duration::from_secs(2));

        let responder = tokio::spawn(async move {
            let sent = handle.sent_rx.recv().await.unwrap();
            let request: serde_json::Value = serde_json::from_str(&sent).unwrap();
            handle.respond(serde_json::json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32601, "message": "method not found" }
            }));
            handle
        });

        let err = rpc.request("nope", None).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("method not found"), "got: {msg}");
        assert!(msg.contains("-32601"), "got: {msg}");
        let _ = responder.await;
    }

    #[tokio::test]
    async fn test_request_times_out_without_response() {
        let (transport, handle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (rpc, _notifications) = rpc_over(Arc::clone(&transport), Duration::from_millis(50));

        let err = rpc.request("slow", None).await.unwrap_err();
        assert!(matches!(
            as_mcprobe_error(&err),
            Some(McprobeError::McpTimeout { .. })
        ));
        // Timeouts are transient for the reconnect policy.
        assert!(is_transient_error(&err));
        drop(handle);
    }

    #[tokio::test]
    async fn test_notifications_are_routed_to_queue() {
        let (transport, handle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (_rpc, mut notifications) = rpc_over(Arc::clone(&transport), Duration::from_secs(2));

        handle.respond(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        }));

        let notification =
            tokio::time::timeout(Duration::from_secs(2), notifications.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(notification.method, NOTIFICATION_TOOLS_CHANGED);
    }

    #[tokio::test]
    async fn test_interleaved_responses_route_by_id() {
        let (transport, mut handle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let rpc = {
            let (tx, _rx) = mpsc::channel(8);
            Arc::new(JsonRpcClient::new(
                Arc::clone(&transport),
                Duration::from_secs(2),
                tx,
                CancellationToken::new(),
            ))
        };

        // Answer both requests in reverse order of arrival.
        let responder = tokio::spawn(async move {
            let first = handle.sent_rx.recv().await.unwrap();
            let second = handle.sent_rx.recv().await.unwrap();
            let first: serde_json::Value = serde_json::from_str(&first).unwrap();
            let second: serde_json::Value = serde_json::from_str(&second).unwrap();
            handle.respond(serde_json::json!({
                "jsonrpc": "2.0", "id": second["id"], "result": "second"
            }));
            handle.respond(serde_json::json!({
                "jsonrpc": "2.0", "id": first["id"], "result": "first"
            }));
            handle
        });

        let (a, b) = tokio::join!(rpc.request("a", None), rpc.request("b", None));
        assert_eq!(a.unwrap(), "first");
        assert_eq!(b.unwrap(), "second");
        let _ = responder.await;
    }

    // McpClient end-to-end behavior (connect, auth re-entry, reconnect
    // policy over a real HTTP transport) is covered by
    // tests/mcp_client_test.rs.
}
