//! MCP transport abstraction
//!
//! The [`Transport`] trait is intentionally minimal: callers `send` a
//! serialized JSON-RPC string and `receive` a stream of serialized
//! JSON-RPC strings, one per logical message. Framing, session management,
//! and authorization signalling are the responsibility of each concrete
//! implementation.
//!
//! One production implementation exists: [`http::HttpTransport`], the
//! Streamable HTTP/SSE transport. [`fake::FakeTransport`] replaces it in
//! tests.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

/// Abstraction over MCP transports.
///
/// Used polymorphically through `Arc<dyn Transport>` by the JSON-RPC
/// client.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends one complete serialized JSON-RPC message to the peer.
    ///
    /// # Errors
    ///
    /// [`crate::error::McprobeError::McpTransport`] on I/O failure;
    /// [`crate::error::McprobeError::AuthRequired`] when the server
    /// answered `401` and authorization must run before retrying.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns the stream of inbound JSON-RPC message strings. The stream
    /// ends when the transport closes.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;
}

pub mod http;

#[cfg(test)]
pub mod fake;
