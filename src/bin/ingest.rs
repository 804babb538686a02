use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use scholar_mcp::config;
use scholar_mcp::initialization::build_rag_service;

/// One-shot ingestion without the MCP server: fetch articles for a query and
/// index their abstracts, then print the report as JSON.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let query = args.next().context("usage: ingest <query> [count]")?;
    let count = match args.next() {
        Some(raw) => raw
            .parse::<usize>()
            .context("count must be a non-negative integer")?,
        None => 10,
    };

    let config = config::load_config()?;
    let service = build_rag_service(&config).await?;

    log::info!("Ingesting up to {} articles for '{}'", count, query);
    let report = service
        .ingest(&query, count, &CancellationToken::new())
        .await?;
    log::info!(
        "Stored {} abstracts from {} fetched articles",
        report.abstracts_stored,
        report.articles_fetched()
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
