//! MCP OAuth 2.1 / OIDC authorization
//!
//! This module implements the authorization subsystem wrapped around the
//! MCP HTTP transport: resource-aware discovery, the browser-based
//! authorization code flow with PKCE, and the outbound request chain that
//! injects resource indicators and registration tokens and reacts to
//! `insufficient_scope` step-up challenges.
//!
//! Authorization applies only to HTTP transport connections.
//!
//! # Module Layout
//!
//! - [`config`]      -- static per-process authorization options
//! - [`challenge`]   -- `WWW-Authenticate` challenge parsing
//! - [`gate`]        -- URL safety gate (SSRF guard, browser launch rule)
//! - [`resource`]    -- RFC 8707 resource identifier canonicalization
//! - [`discovery`]   -- RFC 9728 protected resource metadata and RFC 8414
//!   / OIDC authorization server metadata discovery
//! - [`scopes`]      -- scope selection policy
//! - [`pkce`]        -- PKCE `S256` challenges, `state` and `nonce`
//!   generation
//! - [`chain`]       -- the composable outbound request chain (resource,
//!   registration, step-up links)
//! - [`flow`]        -- the authorization code flow orchestrator
//! - [`callback`]    -- the loopback callback server
//! - [`token_store`] -- in-memory token storage

pub mod callback;
pub mod chain;
pub mod challenge;
pub mod config;
pub mod discovery;
pub mod flow;
pub mod gate;
pub mod pkce;
pub mod resource;
pub mod scopes;
pub mod token_store;

pub use challenge::BearerChallenge;
pub use config::{AuthConfig, ScopeSelectionMode};
pub use flow::AuthFlow;
pub use token_store::{OAuthToken, TokenStore};
