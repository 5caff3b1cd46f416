mod aggregate;
mod config;
mod error;
mod mcp;
mod query;
mod search;
mod tools;
mod unitrad;

use anyhow::{Context, Result};
use config::Config;
use mcp::McpServer;
use tools::{SearchBooksTool, Tool};
use unitrad::UnitradClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::load("config.toml")?;

    // Initialize logging to stderr; stdout belongs to the MCP transport
    init_logging(&config);
    log::info!("Starting nlib MCP server...");
    log::info!(
        "Configuration loaded (endpoint: {}, region: {})",
        config.unitrad.base_url,
        config.unitrad.region
    );

    // One HTTP client for the process; its timeout bounds every remote call
    let http = reqwest::Client::builder()
        .timeout(config.search.http_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let client = UnitradClient::new(
        config.unitrad.base_url.clone(),
        config.unitrad.api_key.clone(),
        config.unitrad.region.clone(),
        http,
    );

    let tool = SearchBooksTool::new(
        client,
        config.search.poll_policy(),
        config.unitrad.library_filter(),
    );
    log::info!("Tool '{}' registered", tool.name());

    McpServer::serve(tool).await?;

    log::info!("Server stopped");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filter)
        .init();
}
