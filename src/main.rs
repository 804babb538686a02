use std::sync::Arc;

use anyhow::Result;
use rmcp::ServiceExt;
use tokio::io::{stdin, stdout};

use scholar_mcp::config;
use scholar_mcp::initialization::initialize_background_services;
use scholar_mcp::server::handler::ScholarServerHandler;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    log::info!("scholar-mcp server (MCP over stdio) started.");

    let config = config::load_config()?;
    log::debug!("Configuration loaded: {:?}", config);
    let config_arc = Arc::new(config);

    let handler = ScholarServerHandler::new(config_arc.clone());
    let service_state = handler.service_state.clone();

    // Serve immediately; tool calls are rejected until initialization lands.
    let transport = (stdin(), stdout());
    log::info!("Starting MCP server listener...");
    let serve_future = handler.serve(transport);

    let init_config = config_arc.clone();
    tokio::spawn(async move {
        log::info!("Background initialization task started.");
        if let Err(e) =
            initialize_background_services(init_config.as_ref().clone(), service_state).await
        {
            // An unusable service would otherwise sit behind a live listener
            // forever; treat this as fatal.
            log::error!("Initialization failed, shutting down: {e:#}");
            std::process::exit(1);
        }
    });

    let server_handle = serve_future.await.inspect_err(|e| {
        log::error!("serving error: {:?}", e);
    })?;

    log::info!("scholar-mcp server running, waiting for completion...");
    let shutdown_reason = server_handle.waiting().await?;
    log::info!("scholar-mcp server finished. Reason: {:?}", shutdown_reason);

    Ok(())
}
