//! # Cardwise
//!
//! Answers questions about a credit-card catalog with retrieval-augmented generation.
//!
//! Usage:
//!   cardwise serve                          # HTTP API on the configured host/port
//!   cardwise ask "Does CardA have an annual fee?"
//!   cardwise search "lounge access" -k 5    # Inspect retrieval only

use anyhow::Result;
use cardwise_agent::RagAgent;
use cardwise_core::config::{CardwiseConfig, expand_path};
use cardwise_core::traits::Retriever;
use cardwise_core::types::Document;
use cardwise_knowledge::{VectorIndex, load_catalog_file};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cardwise",
    version,
    about = "💳 Cardwise: credit-card catalog question answering"
)]
struct Cli {
    /// Config file (default: $CARDWISE_CONFIG or ~/.cardwise/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus JSON file, overrides retrieval.corpus_path
    #[arg(long, global = true)]
    corpus: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Answer a single question and exit
    Ask {
        query: String,
        #[arg(long, default_value = "cli")]
        user_name: String,
    },
    /// Show the documents retrieved for a query
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "cardwise=debug,cardwise_agent=debug,cardwise_knowledge=debug,cardwise_providers=debug,tower_http=debug"
    } else {
        "cardwise=info,cardwise_agent=info,cardwise_knowledge=info,cardwise_providers=info,cardwise_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<CardwiseConfig> {
    let mut config = match &cli.config {
        Some(path) => CardwiseConfig::load_from(path)?,
        None => CardwiseConfig::load()?,
    };
    if let Some(corpus) = &cli.corpus {
        config.retrieval.corpus_path = corpus.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Corpus errors are fatal: there is no partial-corpus fallback.
fn load_corpus(config: &CardwiseConfig) -> Result<Vec<Document>> {
    let path = expand_path(&config.retrieval.corpus_path);
    let documents = load_catalog_file(&path)
        .map_err(|e| anyhow::anyhow!("failed to load corpus {}: {e}", path.display()))?;
    tracing::info!("📚 Loaded {} card(s) from {}", documents.len(), path.display());
    Ok(documents)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let mut config = load_config(&cli)?;
    let documents = load_corpus(&config)?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let agent = Arc::new(RagAgent::from_config(&config, documents).await?);
            cardwise_gateway::start(&config.gateway, agent).await?;
        }
        Command::Ask { query, user_name } => {
            let agent = RagAgent::from_config(&config, documents).await?;
            println!("{}", agent.ask(&query, &user_name).await);
        }
        Command::Search { query, k } => {
            let index = VectorIndex::new(cardwise_providers::create_embedder(&config)?);
            index.build(documents).await?;
            let results = index.search(&query, k.unwrap_or(config.retrieval.top_k)).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}
