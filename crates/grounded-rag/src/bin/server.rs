//! Grounded RAG server binary
//!
//! Run with: cargo run -p grounded-rag --bin grounded-rag-server -- --config rag.toml

use clap::Parser;
use grounded_rag::{config::RagConfig, server::RagServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "grounded-rag-server", version, about = "Document Q&A with cited sources and answer evaluation")]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, env = "GROUNDED_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Ingest the configured documents directory before serving
    #[arg(long)]
    ingest: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grounded_rag=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = RagConfig::load(args.config.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Embedding model: {} ({} dims)", config.embeddings.model, config.embeddings.dimensions);
    tracing::info!("  - Generation model: {}", config.llm.generate_model);
    tracing::info!(
        "  - Chunking: {} tokens, {} overlap",
        config.chunking.max_tokens,
        config.chunking.overlap_tokens
    );
    tracing::info!("  - Index backend: {:?}", config.vector_index.backend);
    tracing::info!("  - Judge: {:?}", config.evaluation.judge);

    let server = RagServer::new(config).await?;

    if args.ingest {
        let report = server.state().service().ingest_directory(None).await?;
        tracing::info!(
            "Startup ingestion: {} indexed, {} unchanged, {} failed",
            report.indexed(),
            report.unchanged(),
            report.failures.len()
        );
    }

    tracing::info!("Health: http://{}/health", server.address());
    tracing::info!("API info: http://{}/api/info", server.address());
    tracing::info!("Press Ctrl+C to stop");

    server.start().await?;

    Ok(())
}
