//! mcprobe - interactive debugging client for MCP servers
//!
//! Main entry point: parse arguments, load configuration, connect to the
//! endpoint (running the OAuth 2.1 authorization flow when the server
//! demands it), and print the server's tool/resource/prompt surface.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcprobe::cli::Cli;
use mcprobe::config::Config;
use mcprobe::mcp::auth::AuthFlow;
use mcprobe::mcp::auth::TokenStore;
use mcprobe::mcp::client::TransportConnector;
use mcprobe::mcp::HttpConnector;
use mcprobe::mcp::McpClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref(), &cli)?;
    config.validate()?;

    let endpoint = config.endpoint_url()?;
    let cancel = CancellationToken::new();
    let http = reqwest::Client::new();
    let tokens = Arc::new(TokenStore::new());

    // Authorization flow plus the transport chain. The transport chain
    // wraps the flow's resource/registration links with the step-up link,
    // which calls back into the flow on 403 insufficient_scope.
    let (auth, connector): (Option<Arc<AuthFlow>>, Arc<dyn TransportConnector>) =
        if config.auth.enabled {
            let flow = Arc::new(AuthFlow::new(
                http.clone(),
                config.auth.clone(),
                &endpoint,
                Arc::clone(&tokens),
                cancel.clone(),
            )?);
            (
                Some(Arc::clone(&flow)),
                Arc::new(HttpConnector::new(
                    endpoint.clone(),
                    flow.transport_chain(None),
                    Arc::clone(&tokens),
                    config.request_timeout(),
                )),
            )
        } else {
            let chain = Arc::new(mcprobe::mcp::auth::chain::HttpExecutor::new(http.clone()));
            (
                None,
                Arc::new(HttpConnector::new(
                    endpoint.clone(),
                    chain,
                    Arc::clone(&tokens),
                    config.request_timeout(),
                )),
            )
        };

    tracing::info!(endpoint = %endpoint, "connecting");
    let client = McpClient::connect(connector, auth, config.request_timeout(), cancel).await?;

    if let Some(info) = client.server_info().await {
        println!("Connected to {} {}", info.name, info.version);
    }

    let capabilities = client.server_capabilities().await.unwrap_or_default();

    if capabilities.tools.is_some() {
        let tools = client.list_tools().await?;
        println!("\nTools ({}):", tools.len());
        for tool in &tools {
            println!("  {}  {}", tool.name, tool.description.as_deref().unwrap_or(""));
        }
    }

    if capabilities.resources.is_some() {
        let resources = client.list_resources().await?;
        println!("\nResources ({}):", resources.len());
        for resource in &resources {
            println!(
                "  {}  {}",
                resource.uri,
                resource.name.as_deref().unwrap_or("")
            );
        }
    }

    if capabilities.prompts.is_some() {
        let prompts = client.list_prompts().await?;
        println!("\nPrompts ({}):", prompts.len());
        for prompt in &prompts {
            println!(
                "  {}  {}",
                prompt.name,
                prompt.description.as_deref().unwrap_or("")
            );
        }
    }

    client.close().await;
    Ok(())
}

/// Initializes the tracing subscriber. `RUST_LOG` wins when set; the
/// verbose flag raises the default from `warn` to `debug`.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "mcprobe=debug" } else { "mcprobe=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
