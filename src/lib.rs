//! mcprobe - interactive debugging client for MCP servers
//!
//! This library provides the functionality behind the `mcprobe` binary: an
//! MCP client over Streamable HTTP transports wrapped in an OAuth 2.1
//! authorization subsystem (resource-aware discovery, PKCE authorization
//! code flow with a loopback callback, dynamic client registration, and
//! step-up re-authorization with bounded retries).
//!
//! # Architecture
//!
//! - `mcp::auth`: the authorization core -- challenge parsing, the URL
//!   safety gate, RFC 9728/8414 discovery, the request chain, the flow
//!   orchestrator, and the callback server
//! - `mcp::client` / `mcp::transport`: the protocol client facade and the
//!   HTTP transport it runs on
//! - `config`: process configuration loaded from YAML plus CLI overrides
//! - `error`: error types and result alias
//! - `cli`: command-line interface definition

pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{McprobeError, Result};
pub use mcp::auth::{AuthConfig, AuthFlow, TokenStore};
pub use mcp::McpClient;
