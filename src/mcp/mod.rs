//! MCP (Model Context Protocol) client support
//!
//! Everything needed to connect to an MCP server over a Streamable HTTP
//! transport, authorize against it, and reflect its tool/resource/prompt
//! surface.
//!
//! # Module Layout
//!
//! - `types`     -- MCP protocol types and JSON-RPC primitives
//! - `client`    -- JSON-RPC correlation layer and the typed [`McpClient`]
//!   facade with its reconnect-once policy
//! - `transport` -- the `Transport` trait and the Streamable HTTP
//!   implementation (requests routed through the authorization chain)
//! - `auth`      -- the OAuth 2.1 authorization subsystem

pub mod auth;
pub mod client;
pub mod transport;
pub mod types;

pub use client::{HttpConnector, McpClient};
pub use types::*;
