use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::cache::Namespace;
use crate::config::{Config, get_config_dir};
use crate::embeddings::CancelFlag;
use crate::embeddings::models::EMBEDDING_MODELS;
use crate::retrieval::{IngestFile, IngestOptions, RetrievalService, SearchOptions};

/// Load the configuration from `config_dir`, or from the platform default
#[inline]
pub fn load_config(config_dir: Option<&Path>) -> Result<Config> {
    let dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => get_config_dir().context("Failed to locate config directory")?,
    };
    Config::load(dir)
}

async fn open_service(config: &Config, knowledge_base: &str) -> Result<RetrievalService> {
    RetrievalService::open(config, knowledge_base)
        .await
        .with_context(|| format!("Failed to open knowledge base {}", knowledge_base))
}

/// Print the effective configuration, writing defaults first unless `show_only`
#[inline]
pub fn show_config(config: &Config, show_only: bool) -> Result<()> {
    let config_path = config.config_file_path();
    if !show_only && !config_path.exists() {
        config.save()?;
        eprintln!(
            "{} {}",
            style("✓ Wrote default configuration to").green(),
            style(config_path.display()).cyan()
        );
    }

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    match config.embedding.base_url() {
        Ok(url) => eprintln!("  Base URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Base URL: {} ({})", style("Invalid").red(), e),
    }
    match config.embedding.huggingface_url() {
        Ok(url) => eprintln!("  HuggingFace URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  HuggingFace URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!(
        "  API key: {}",
        style(if config.embedding.api_key.is_some() { "set" } else { "not set" }).cyan()
    );
    eprintln!("  Batch size: {}", style(config.embedding.batch_size).cyan());
    eprintln!("  Workers: {}", style(config.embedding.workers).cyan());
    eprintln!(
        "  Fallback to local: {}",
        style(config.embedding.fallback_to_local).cyan()
    );
    eprintln!();

    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!("  Chunk size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!("  Overlap: {}", style(config.chunking.overlap).cyan());
    eprintln!();

    eprintln!("{}", style("Index:").bold().yellow());
    eprintln!("  HNSW threshold: {}", style(config.index.hnsw_threshold).cyan());
    eprintln!(
        "  M / efConstruction / efSearch: {}",
        style(format!(
            "{} / {} / {}",
            config.index.m, config.index.ef_construction, config.index.ef_search
        ))
        .cyan()
    );
    eprintln!();

    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!("  Min score: {}", style(config.retrieval.min_score).cyan());
    eprintln!(
        "  Context budget: {} chars",
        style(config.retrieval.max_context_chars).cyan()
    );
    eprintln!();

    eprintln!("Config file: {}", style(config_path.display()).dim());
    eprintln!("Cache: {}", style(config.cache_path().display()).dim());
    Ok(())
}

/// Ingest each file into the knowledge base, continuing past failures
#[inline]
pub async fn ingest_files(
    config: &Config,
    knowledge_base: &str,
    files: &[PathBuf],
    mime_type: Option<String>,
) -> Result<()> {
    let service = open_service(config, knowledge_base).await?;
    let options = IngestOptions {
        chunking: config.chunking,
        use_cache: config.retrieval.use_cache,
    };
    let cancel = CancelFlag::new();
    let mut failures = 0_usize;

    for path in files {
        let file = IngestFile::from_path(path, mime_type.clone())
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(100).with_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                    .context("Invalid progress template")?,
            )
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(file.name.clone());
        let observer = |percent: u8| bar.set_position(u64::from(percent));

        match service
            .ingest_with(file, &options, &cancel, Some(&observer))
            .await
        {
            Ok(outcome) => {
                bar.finish_and_clear();
                println!(
                    "{} {} ({} chunks, id {})",
                    style("✓").green(),
                    outcome.document.name,
                    outcome.chunks.len(),
                    style(&outcome.document.id).dim()
                );
            }
            Err(e) => {
                bar.abandon();
                failures += 1;
                error!("Failed to ingest {}: {}", path.display(), e);
                println!("{} {}: {}", style("✗").red(), path.display(), e);
            }
        }
    }

    let stats = service.embedding_stats();
    eprintln!(
        "{} {} requests, {} cache hits, {} errors, {} local fallbacks, {:?} average",
        style("Embeddings:").dim(),
        stats.total_requests,
        stats.cache_hits,
        stats.errors,
        stats.fallbacks,
        stats.average_duration()
    );

    service.close().await;
    info!(
        "Ingested {} of {} files into {}",
        files.len() - failures,
        files.len(),
        knowledge_base
    );

    if failures > 0 {
        anyhow::bail!("{} of {} files failed to ingest", failures, files.len());
    }
    Ok(())
}

/// Run a query and print ranked results, optionally with the assembled context
#[inline]
pub async fn search(
    config: &Config,
    knowledge_base: &str,
    query: &str,
    options: &SearchOptions,
    context_chars: Option<usize>,
) -> Result<()> {
    let service = open_service(config, knowledge_base).await?;
    let outcome = service.search(query, options).await?;
    service.close().await;

    if outcome.results.is_empty() {
        println!("No results for {:?}", query);
    }

    for (rank, result) in outcome.results.iter().enumerate() {
        println!(
            "{} {} #{} {}",
            style(format!("[{}]", rank + 1)).bold(),
            style(&result.document_name).cyan(),
            result.chunk_index,
            style(format!("{:.3}", result.score)).green()
        );
        println!("    {}", preview(&result.content, 160));
    }

    let stats = outcome.stats;
    eprintln!();
    eprintln!(
        "{}",
        style(format!(
            "{} of {} chunks in {:?} (embedding {:?}, retrieval {:?}, ~{} tokens{})",
            stats.chunks_retrieved,
            stats.chunks_searched,
            stats.total_time,
            stats.embedding_time,
            stats.retrieval_time,
            stats.tokens_used,
            if stats.from_cache { ", cached" } else { "" }
        ))
        .dim()
    );

    if let Some(max_chars) = context_chars {
        println!();
        println!("{}", RetrievalService::build_context(&outcome.results, max_chars));
    }
    Ok(())
}

/// List documents in the knowledge base
#[inline]
pub async fn list_documents(config: &Config, knowledge_base: &str) -> Result<()> {
    let service = open_service(config, knowledge_base).await?;
    let documents = service.documents().await;
    let index = service.index_stats().await;
    service.close().await;

    if documents.is_empty() {
        println!("No documents in knowledge base {}.", knowledge_base);
        println!("Use 'nexus-rag ingest <file>' to add one.");
        return Ok(());
    }

    println!(
        "Knowledge base {} ({} documents):",
        style(knowledge_base).bold(),
        documents.len()
    );
    println!();

    for document in &documents {
        println!("📄 {} (ID: {})", document.name, document.id);
        println!("   Type: {}", document.mime_type);
        println!(
            "   Size: {} bytes, ~{} pages, {} chunks",
            document.size_bytes,
            document.page_count,
            document.chunk_ids.len()
        );
        println!(
            "   Added: {}",
            document.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    println!("Index:");
    println!("  Kind: {}", index.kind);
    println!("  Vectors: {}", index.node_count);
    if index.max_level > 0 {
        println!("  Levels: {}", index.max_level + 1);
    }
    println!("  Avg connections: {}", index.avg_connections);
    println!("  Memory estimate: {} bytes", index.memory_estimate_bytes);
    Ok(())
}

#[inline]
pub async fn remove_document(config: &Config, knowledge_base: &str, document_id: &str) -> Result<()> {
    let service = open_service(config, knowledge_base).await?;
    let removed = service.remove_document(document_id).await?;
    service.close().await;

    if removed {
        println!("{} Removed document {}", style("✓").green(), document_id);
        Ok(())
    } else {
        anyhow::bail!("Document not found: {}", document_id)
    }
}

#[inline]
pub async fn cache_stats(config: &Config) -> Result<()> {
    let store = crate::cache::CacheStore::open(config.cache_path(), config.cache).await?;
    let stats = store.stats().await?;
    store.close().await;

    println!("{}", style("Cache").bold().cyan());
    for namespace in Namespace::ALL {
        println!("  {:<15} {}", namespace.as_str(), stats.count(namespace));
    }
    println!("  {:<15} {}", "total", stats.total_entries());
    println!("  {:<15} {} bytes", "size", stats.total_size_bytes);
    Ok(())
}

/// Clear one namespace, or every namespace when `namespace` is `None`
#[inline]
pub async fn cache_clear(config: &Config, namespace: Option<&str>) -> Result<()> {
    let namespace = namespace.map(str::parse::<Namespace>).transpose()?;
    let store = crate::cache::CacheStore::open(config.cache_path(), config.cache).await?;

    let removed = match namespace {
        Some(namespace) => store.clear_namespace(namespace).await?,
        None => store.clear_all().await?,
    };
    store.close().await;

    println!(
        "{} Removed {} entries from {}",
        style("✓").green(),
        removed,
        namespace.map_or("all namespaces", Namespace::as_str)
    );
    Ok(())
}

#[inline]
pub async fn cache_cleanup(config: &Config) -> Result<()> {
    let store = crate::cache::CacheStore::open(config.cache_path(), config.cache).await?;
    let removed = store.cleanup_expired().await?;
    store.close().await;

    println!("{} Removed {} expired entries", style("✓").green(), removed);
    Ok(())
}

#[inline]
pub fn list_models(active: &str) {
    println!("{}", style("Embedding models").bold().cyan());
    for model in EMBEDDING_MODELS {
        let marker = if model.id == active { "*" } else { " " };
        println!(
            "{} {:<40} {:>5} dims  {:<11}  {}",
            marker,
            model.id,
            model.dimensions,
            model.provider.label(),
            model.name
        );
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
