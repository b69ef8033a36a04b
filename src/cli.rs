//! Command-line interface definition for mcprobe
//!
//! This module defines the CLI structure using clap's derive API. The CLI
//! only populates configuration; the authorization core reads the merged
//! [`crate::config::Config`].

use clap::Parser;

/// mcprobe - interactive debugging client for MCP servers
///
/// Connects to an MCP server over Streamable HTTP, authorizes with OAuth
/// 2.1 when the server demands it, and reflects the server's tools,
/// resources, and prompts.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcprobe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// MCP server endpoint URL (e.g. https://mcp.example.com/mcp)
    pub endpoint: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Disable the OAuth 2.1 authorization subsystem
    #[arg(long)]
    pub no_auth: bool,

    /// Pre-registered OAuth client ID (skips dynamic registration)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Scope to request; repeat for multiple scopes
    #[arg(long = "scopes")]
    pub scopes: Vec<String>,

    /// Per-request timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parses the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("mcprobe").chain(args.iter().copied()))
    }

    #[test]
    fn test_endpoint_positional() {
        let cli = parse(&["https://mcp.example.com/mcp"]);
        assert_eq!(cli.endpoint.as_deref(), Some("https://mcp.example.com/mcp"));
        assert!(!cli.no_auth);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_all_flags() {
        let cli = parse(&[
            "https://mcp.example.com/mcp",
            "--config",
            "probe.yaml",
            "--no-auth",
            "--client-id",
            "my-client",
            "--scopes",
            "files:read",
            "--timeout",
            "10",
            "--verbose",
        ]);
        assert_eq!(cli.config.as_deref(), Some("probe.yaml"));
        assert!(cli.no_auth);
        assert_eq!(cli.client_id.as_deref(), Some("my-client"));
        assert_eq!(cli.scopes, vec!["files:read"]);
        assert_eq!(cli.timeout, Some(10));
        assert!(cli.verbose);
    }

    #[test]
    fn test_no_arguments_is_accepted() {
        // The endpoint may come from the config file instead.
        let cli = parse(&[]);
        assert!(cli.endpoint.is_none());
    }
}
