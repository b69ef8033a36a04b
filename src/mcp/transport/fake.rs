//! In-process fake transport for tests
//!
//! [`FakeTransport`] replaces real network I/O with in-memory channels.
//! The paired [`FakeHandle`] is the "server" side: it reads what the
//! client sent (`sent_rx`) and injects responses (`respond`).

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{McprobeError, Result};
use crate::mcp::transport::Transport;

/// Channel-backed [`Transport`] double.
#[derive(Debug)]
pub struct FakeTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

/// Test-side handle of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeHandle {
    /// Messages the client sent, in order.
    pub sent_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    /// Creates a `(transport, handle)` pair.
    pub fn new() -> (Self, FakeHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                sent_tx,
                inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            },
            FakeHandle {
                sent_rx,
                inbound_tx,
            },
        )
    }
}

impl FakeHandle {
    /// Injects a JSON value as a serialized inbound message.
    pub fn respond(&self, message: serde_json::Value) {
        let serialized = message.to_string();
        let _ = self.inbound_tx.send(serialized);
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.sent_tx.send(message).map_err(|_| {
            McprobeError::McpTransport("fake transport handle dropped".to_string()).into()
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_is_visible_on_handle() {
        let (transport, mut handle) = FakeTransport::new();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(handle.sent_rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_respond_is_visible_on_receive() {
        let (transport, handle) = FakeTransport::new();
        handle.respond(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        let message = transport.receive().next().await.unwrap();
        assert!(message.contains("result"));
    }

    #[tokio::test]
    async fn test_send_fails_after_handle_drop() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[test]
    fn test_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }
}
