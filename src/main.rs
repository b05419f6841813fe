use anyhow::Result;
use clap::{Parser, Subcommand};
use nexus_rag::commands::{
    cache_cleanup, cache_clear, cache_stats, ingest_files, list_documents, list_models,
    load_config, remove_document, search, show_config,
};
use nexus_rag::retrieval::SearchOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nexus-rag")]
#[command(about = "Document ingestion and semantic retrieval for RAG prompts")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the cache database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Knowledge base to operate on
    #[arg(long, global = true, default_value = "default")]
    kb: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration, writing defaults if none exist
    Config {
        /// Only print, never write
        #[arg(long)]
        show: bool,
    },
    /// Parse, chunk, embed and index files
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// MIME type to record for every file
        #[arg(long)]
        mime: Option<String>,
    },
    /// Semantic search over the knowledge base
    Search {
        query: String,
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Bypass the search result cache
        #[arg(long)]
        no_cache: bool,
        /// Also print a prompt context of at most this many characters
        #[arg(long)]
        context_chars: Option<usize>,
    },
    /// List ingested documents
    Documents,
    /// Remove a document and its chunks
    Remove { document_id: String },
    /// Inspect or clear the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// List supported embedding models
    Models,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts per namespace
    Stats,
    /// Clear one namespace, or everything
    Clear { namespace: Option<String> },
    /// Delete expired entries
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            show_config(&config, show)?;
        }
        Commands::Ingest { files, mime } => {
            ingest_files(&config, &cli.kb, &files, mime).await?;
        }
        Commands::Search {
            query,
            top_k,
            min_score,
            no_cache,
            context_chars,
        } => {
            let defaults = config.retrieval.search_options();
            let options = SearchOptions {
                top_k: top_k.unwrap_or(defaults.top_k),
                min_score: min_score.unwrap_or(defaults.min_score),
                use_cache: defaults.use_cache && !no_cache,
            };
            search(&config, &cli.kb, &query, &options, context_chars).await?;
        }
        Commands::Documents => {
            list_documents(&config, &cli.kb).await?;
        }
        Commands::Remove { document_id } => {
            remove_document(&config, &cli.kb, &document_id).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => cache_stats(&config).await?,
            CacheAction::Clear { namespace } => cache_clear(&config, namespace.as_deref()).await?,
            CacheAction::Cleanup => cache_cleanup(&config).await?,
        },
        Commands::Models => {
            list_models(&config.embedding.model);
        }
    }

    Ok(())
}
