//! Composable HTTP request chain
//!
//! Outbound HTTP requests made on behalf of the MCP client pass through a
//! linear chain of links, each implementing [`RequestChain`] and wrapping
//! the next stage. The chain is deterministic: on the outbound path,
//! resource-indicator injection runs before registration-token injection
//! before step-up handling before the base executor; response handling
//! unwinds in reverse.
//!
//! ```text
//! ResourceLink -> RegistrationLink -> StepUpLink -> HttpExecutor
//! ```
//!
//! Links never assume a concrete type for their `next` stage, so test
//! doubles and partial chains (the authorization flow itself runs without
//! the step-up link) compose freely.
//!
//! # Module Layout
//!
//! - [`resource`]     -- RFC 8707 `resource` parameter injection
//! - [`registration`] -- registration access token injection for DCR
//! - [`step_up`]      -- `403 insufficient_scope` step-up handling and the
//!   retry ledger

pub mod registration;
pub mod resource;
pub mod step_up;

use async_trait::async_trait;

use crate::error::{McprobeError, Result};

// ---------------------------------------------------------------------------
// RequestChain
// ---------------------------------------------------------------------------

/// One stage of the outbound HTTP pipeline.
///
/// The contract is "given a request, return a response"; a stage may
/// forward the request unchanged, forward a modified clone, or perform
/// additional requests of its own (the step-up link replays the original
/// after re-authorization).
#[async_trait]
pub trait RequestChain: Send + Sync {
    /// Executes `request` and returns the response.
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

// ---------------------------------------------------------------------------
// HttpExecutor
// ---------------------------------------------------------------------------

/// The innermost chain stage: hands the request to the shared
/// [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Wraps a client as the chain terminal.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestChain for HttpExecutor {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let endpoint = describe_request(&request);
        self.client
            .execute(request)
            .await
            .map_err(|e| McprobeError::McpTransport(format!("{endpoint}: {e}")).into())
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the links
// ---------------------------------------------------------------------------

/// `METHOD host path` rendering used in errors and the retry ledger.
pub(crate) fn describe_request(request: &reqwest::Request) -> String {
    format!(
        "{} {} {}",
        request.method(),
        request.url().host_str().unwrap_or(""),
        request.url().path()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_request_renders_method_host_path() {
        let req = reqwest::Request::new(
            reqwest::Method::POST,
            url::Url::parse("https://mcp.example.com/mcp/tool").unwrap(),
        );
        assert_eq!(describe_request(&req), "POST mcp.example.com /mcp/tool");
    }
}
