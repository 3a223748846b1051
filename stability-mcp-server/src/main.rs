//! Stability AI MCP Server
//!
//! Serves the Stability AI image tools over stdio (default) or SSE (`--sse`).

use anyhow::Result;
use clap::Parser;
use stability_mcp_common::storage::build_store;
use stability_mcp_common::tracing::init_tracing;
use stability_mcp_common::{Config, McpServerBuilder, TransportArgs};
use stability_mcp_server::{ImageHandler, StabilityClient, StabilityServer};

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "stability-mcp-server")]
#[command(about = "MCP server for Stability AI image generation")]
struct Args {
    #[command(flatten)]
    transport: TransportArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let config = Config::from_env()?;
    let transport = args.transport.into_transport(config.port);
    let backend = config.storage_backend(transport)?;
    tracing::info!(
        base_url = %config.api_base_url,
        save_metadata = config.save_metadata,
        save_metadata_failed = config.save_metadata_failed,
        "Configuration loaded"
    );

    let store = build_store(backend).await?;
    let client = StabilityClient::new(&config.api_key, &config.api_base_url)?;
    let handler = ImageHandler::new(client, store)
        .with_metadata(config.save_metadata, config.save_metadata_failed)
        .with_local_source_paths(transport.is_stdio());

    McpServerBuilder::new(StabilityServer::new(handler))
        .with_transport(transport)
        .run()
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
