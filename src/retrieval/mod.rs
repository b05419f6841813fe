// Retrieval service: ingestion, search and context assembly over one knowledge base


pub mod context;
pub mod models;
pub mod parser;
pub mod progress;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, CacheStore, Namespace, cache_key, content_digest};
use crate::config::Config;
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::pool::{CancelFlag, WorkerPool};
use crate::embeddings::provider::{EmbeddingProvider, EmbeddingStats};
use crate::index::{AdaptiveIndex, IndexStats, VectorIndex, check_dimensions};
use crate::{RagError, Result};

pub use context::build_context;
pub use models::{
    CONTENT_PREVIEW_CHARS, Document, DocumentChunk, IngestFile, IngestOutcome, IngestSummary,
    ParsedDocument, SearchOptions, SearchOutcome, SearchResult, SearchStats,
};
pub use parser::{DocumentParser, PlainTextParser};
pub use progress::{ProgressObserver, ProgressTracker};

use models::{CachedDocument, CachedHit, KnowledgeBaseSnapshot};
use progress::{CHUNKED_PERCENT, DONE_PERCENT, EMBEDDING_START_PERCENT, PARSED_PERCENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunking: ChunkingConfig,
    pub use_cache: bool,
}

impl Default for IngestOptions {
    #[inline]
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            use_cache: true,
        }
    }
}

/// Documents, chunks and the index built over their embeddings
#[derive(Debug)]
struct Corpus {
    documents: Vec<Document>,
    chunks: Vec<DocumentChunk>,
    positions: HashMap<String, usize>,
    index: AdaptiveIndex,
    /// Never reused, so search keys from an earlier life of the corpus cannot match
    generation: String,
    revision: u64,
}

impl Corpus {
    fn new(index: AdaptiveIndex) -> Self {
        Self {
            documents: Vec::new(),
            chunks: Vec::new(),
            positions: HashMap::new(),
            index,
            generation: Uuid::new_v4().to_string(),
            revision: 0,
        }
    }

    fn reset(&mut self) {
        self.documents.clear();
        self.chunks.clear();
        self.positions.clear();
        self.index.clear();
        self.generation = Uuid::new_v4().to_string();
        self.revision = 0;
    }

    fn refresh_positions(&mut self) {
        self.positions = self
            .chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| (chunk.id.clone(), position))
            .collect();
    }

    fn chunk(&self, id: &str) -> Option<&DocumentChunk> {
        self.positions
            .get(id)
            .and_then(|&position| self.chunks.get(position))
    }

    fn embedded_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.embedding.is_some())
            .count()
    }

    fn result_for(&self, chunk_id: &str, score: f32) -> Option<SearchResult> {
        self.chunk(chunk_id).map(|chunk| SearchResult {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            document_name: chunk.document_name.clone(),
            content: chunk.content.clone(),
            chunk_index: chunk.chunk_index,
            score,
        })
    }

    /// Re-index every embedded chunk from scratch
    fn rebuild_index(&mut self) {
        self.index.clear();
        let expected = self.index.dimensions();
        for chunk in &self.chunks {
            let Some(embedding) = &chunk.embedding else {
                continue;
            };
            if let Err(e) = self.index.add(&chunk.id, embedding) {
                warn!(
                    "Skipping chunk {} (width {}, expected {}): {}",
                    chunk.id,
                    embedding.len(),
                    expected,
                    e
                );
            }
        }
        info!("Rebuilt vector index with {} vectors", self.index.size());
    }

    /// Publish `document` with `chunks`, replacing any earlier version of it.
    ///
    /// Fails without touching the corpus when a chunk id repeats within
    /// `chunks` or is already owned by a different document.
    fn insert(&mut self, document: Document, chunks: Vec<DocumentChunk>) -> Result<()> {
        let mut incoming = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            if !incoming.insert(chunk.id.as_str()) {
                return Err(RagError::DuplicateChunk {
                    chunk_id: chunk.id.clone(),
                    owner: document.id.clone(),
                });
            }
            if let Some(existing) = self.chunk(&chunk.id) {
                if existing.document_id != document.id {
                    return Err(RagError::DuplicateChunk {
                        chunk_id: chunk.id.clone(),
                        owner: existing.document_id.clone(),
                    });
                }
            }
        }

        let stale: Vec<String> = self
            .chunks
            .iter()
            .filter(|chunk| chunk.document_id == document.id)
            .map(|chunk| chunk.id.clone())
            .collect();
        if !stale.is_empty() {
            debug!(
                "Replacing {} chunks of document {}",
                stale.len(),
                document.id
            );
            for chunk_id in &stale {
                self.index.remove(chunk_id);
            }
            self.chunks.retain(|chunk| chunk.document_id != document.id);
        }

        for chunk in &chunks {
            if let Some(embedding) = &chunk.embedding {
                if let Err(e) = self.index.add(&chunk.id, embedding) {
                    warn!("Failed to index chunk {}: {}", chunk.id, e);
                }
            }
        }
        self.documents.retain(|existing| existing.id != document.id);
        self.documents.push(document);
        self.chunks.extend(chunks);
        self.refresh_positions();
        self.revision += 1;
        Ok(())
    }

    fn snapshot(&self, provider: &EmbeddingProvider) -> KnowledgeBaseSnapshot {
        KnowledgeBaseSnapshot {
            model_id: provider.model().id.to_string(),
            dimensions: provider.dimensions(),
            generation: self.generation.clone(),
            revision: self.revision,
            documents: self.documents.clone(),
            chunks: self.chunks.clone(),
        }
    }
}

/// Owns one knowledge base: its documents, chunks, vector index and caches.
///
/// Searches share a read lock over the corpus. Ingestion embeds outside the
/// lock and only takes the write lock to publish the finished document.
pub struct RetrievalService {
    knowledge_base_id: String,
    provider: EmbeddingProvider,
    pool: WorkerPool,
    cache: CacheStore,
    parser: Box<dyn DocumentParser>,
    ingest_defaults: IngestOptions,
    corpus: RwLock<Corpus>,
    maintenance: Option<JoinHandle<()>>,
}

impl RetrievalService {
    #[inline]
    pub fn new(
        knowledge_base_id: impl Into<String>,
        provider: EmbeddingProvider,
        cache: CacheStore,
        config: &Config,
    ) -> Self {
        let index = AdaptiveIndex::with_threshold(
            provider.dimensions(),
            config.index.hnsw_threshold,
            config.index.hnsw_config(),
        );

        Self {
            knowledge_base_id: knowledge_base_id.into(),
            pool: WorkerPool::from_settings(&config.embedding),
            parser: Box::new(PlainTextParser),
            ingest_defaults: IngestOptions {
                chunking: config.chunking,
                use_cache: config.retrieval.use_cache,
            },
            corpus: RwLock::new(Corpus::new(index)),
            maintenance: None,
            provider,
            cache,
        }
    }

    /// Open the cache under the config directory, build the provider and
    /// restore any saved snapshot for `knowledge_base_id`.
    ///
    /// Expired cache entries are purged in the background until the service
    /// is closed or dropped.
    #[inline]
    pub async fn open(config: &Config, knowledge_base_id: impl Into<String>) -> Result<Self> {
        let cache = CacheStore::open(config.cache_path(), config.cache).await?;
        let provider = EmbeddingProvider::from_settings(&config.embedding, Some(cache.clone()))?;
        let mut service = Self::new(knowledge_base_id, provider, cache, config);
        service.initialize().await?;
        service.maintenance = Some(
            service
                .cache
                .spawn_maintenance(config.cache.maintenance_interval()),
        );
        Ok(service)
    }

    /// Stop background maintenance and close the cache
    #[inline]
    pub async fn close(&self) {
        if let Some(handle) = &self.maintenance {
            handle.abort();
        }
        self.cache.close().await;
    }

    /// Whether the background cache maintenance task is running
    #[inline]
    pub fn is_maintaining(&self) -> bool {
        self.maintenance
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    #[inline]
    pub fn with_parser(mut self, parser: Box<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    #[inline]
    pub fn with_worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    #[inline]
    pub fn with_index(mut self, index: AdaptiveIndex) -> Self {
        self.corpus = RwLock::new(Corpus::new(index));
        self
    }

    #[inline]
    pub fn knowledge_base_id(&self) -> &str {
        &self.knowledge_base_id
    }

    #[inline]
    pub const fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    #[inline]
    pub const fn cache(&self) -> &CacheStore {
        &self.cache
    }

    #[inline]
    pub const fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Restore the saved snapshot, if one exists for the active model.
    /// Returns the number of chunks restored.
    #[inline]
    pub async fn initialize(&self) -> Result<usize> {
        let Some(snapshot) = self
            .cache
            .get::<KnowledgeBaseSnapshot>(Namespace::VectorIndex, &self.knowledge_base_id)
            .await
        else {
            debug!("No snapshot for knowledge base {}", self.knowledge_base_id);
            return Ok(0);
        };

        if snapshot.model_id != self.provider.model().id
            || snapshot.dimensions != self.provider.dimensions()
        {
            warn!(
                "Ignoring snapshot for {} built with {} ({} dimensions)",
                self.knowledge_base_id, snapshot.model_id, snapshot.dimensions
            );
            return Ok(0);
        }

        let restored = snapshot.chunks.len();
        let mut corpus = self.corpus.write().await;
        corpus.documents = snapshot.documents;
        corpus.chunks = snapshot.chunks;
        if !snapshot.generation.is_empty() {
            corpus.generation = snapshot.generation;
        }
        corpus.revision = snapshot.revision;
        corpus.refresh_positions();
        corpus.rebuild_index();
        drop(corpus);

        info!(
            "Restored knowledge base {} with {} chunks",
            self.knowledge_base_id, restored
        );
        Ok(restored)
    }

    /// Parse, chunk, embed and index one file with the configured defaults
    #[inline]
    pub async fn ingest(&self, file: IngestFile) -> Result<IngestOutcome> {
        self.ingest_with(file, &self.ingest_defaults, &CancelFlag::new(), None)
            .await
    }

    #[inline]
    pub async fn ingest_with(
        &self,
        file: IngestFile,
        options: &IngestOptions,
        cancel: &CancelFlag,
        observer: Option<ProgressObserver<'_>>,
    ) -> Result<IngestOutcome> {
        options.chunking.validate()?;
        let progress = ProgressTracker::new(observer);

        let parsed = self.prepare_document(&file, options, &progress).await?;
        progress.report(CHUNKED_PERCENT);

        progress.report(EMBEDDING_START_PERCENT);
        let embeddings = self
            .pool
            .embed_all(&self.provider, &parsed.chunks, cancel, |done, total| {
                progress.embedding(done, total);
            })
            .await?;

        let now = Utc::now();
        let document_id = Uuid::new_v4().to_string();
        let total_chunks = parsed.chunks.len();
        let dimensions = self.provider.dimensions();

        let mut chunks = Vec::with_capacity(total_chunks);
        for (chunk_index, (content, embedding)) in
            parsed.chunks.into_iter().zip(embeddings).enumerate()
        {
            let embedding = match embedding {
                Ok(vector) => {
                    check_dimensions(dimensions, vector.len())?;
                    Some(vector)
                }
                Err(e) => {
                    warn!(
                        "Chunk {} of {} has no embedding: {}",
                        chunk_index, file.name, e
                    );
                    None
                }
            };
            chunks.push(DocumentChunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.clone(),
                document_name: file.name.clone(),
                content,
                chunk_index,
                total_chunks,
                embedding,
            });
        }

        let document = Document {
            id: document_id,
            name: file.name.clone(),
            mime_type: file
                .mime_type
                .clone()
                .unwrap_or_else(|| "text/plain".to_string()),
            size_bytes: file.bytes.len() as u64,
            page_count: parsed.page_count,
            raw_content_preview: parsed.content_preview,
            chunk_ids: chunks.iter().map(|chunk| chunk.id.clone()).collect(),
            created_at: now,
            updated_at: now,
        };

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let outcome = IngestOutcome {
            document: document.clone(),
            chunks: chunks.clone(),
        };

        let mut corpus = self.corpus.write().await;
        corpus.insert(document, chunks)?;
        let snapshot = corpus.snapshot(&self.provider);
        drop(corpus);

        self.persist_snapshot(&snapshot).await;
        progress.report(DONE_PERCENT);

        info!(
            "Ingested {} into {} ({} chunks)",
            file.name,
            self.knowledge_base_id,
            outcome.chunks.len()
        );
        Ok(outcome)
    }

    /// Parsed text and chunks for `file`, from the document cache when possible
    async fn prepare_document(
        &self,
        file: &IngestFile,
        options: &IngestOptions,
        progress: &ProgressTracker<'_>,
    ) -> Result<CachedDocument> {
        let key = cache_key(&[
            "document",
            &file.name,
            &content_digest(&file.bytes),
            &options.chunking.chunk_size.to_string(),
            &options.chunking.overlap.to_string(),
        ]);

        if options.use_cache {
            if let Some(entry) = self
                .cache
                .get::<CachedDocument>(Namespace::Documents, &key)
                .await
            {
                debug!("Document cache hit for {}", entry.file_name);
                return Ok(entry);
            }
        }

        let parsed = self.parser.parse(file).await?;
        progress.report(PARSED_PERCENT);

        let entry = CachedDocument {
            file_name: file.name.clone(),
            content_preview: parsed.content.chars().take(CONTENT_PREVIEW_CHARS).collect(),
            page_count: parsed.page_count,
            chunks: options.chunking.split(&parsed.content)?,
        };

        if options.use_cache {
            if let Err(e) = self
                .cache
                .set_default(Namespace::Documents, &key, &entry)
                .await
            {
                warn!("Failed to cache parsed document {}: {}", file.name, e);
            }
        }
        Ok(entry)
    }

    /// Add a document whose chunks were embedded elsewhere.
    ///
    /// Every embedding must match the active model's width and no chunk id may
    /// belong to another document. Adding a document again replaces its chunks.
    #[inline]
    pub async fn add_chunks(&self, document: Document, chunks: Vec<DocumentChunk>) -> Result<()> {
        let dimensions = self.provider.dimensions();
        for embedding in chunks.iter().filter_map(|chunk| chunk.embedding.as_ref()) {
            check_dimensions(dimensions, embedding.len())?;
        }

        let mut corpus = self.corpus.write().await;
        corpus.insert(document, chunks)?;
        let snapshot = corpus.snapshot(&self.provider);
        drop(corpus);

        self.persist_snapshot(&snapshot).await;
        Ok(())
    }

    #[inline]
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchOutcome> {
        let started = Instant::now();
        let tokens_used = query.chars().count().div_ceil(2);

        if options.use_cache {
            if let Some((results, chunks_searched)) = self.cached_results(query, options).await {
                debug!("Search cache hit for {:?}", query);
                return Ok(SearchOutcome {
                    stats: SearchStats {
                        embedding_time: Duration::ZERO,
                        retrieval_time: Duration::ZERO,
                        total_time: started.elapsed(),
                        chunks_searched,
                        chunks_retrieved: results.len(),
                        tokens_used,
                        from_cache: true,
                    },
                    results,
                });
            }
        }

        let embedding_started = Instant::now();
        let query_vector = self.provider.embed(query).await?;
        let embedding_time = embedding_started.elapsed();

        self.ensure_consistent().await;

        let retrieval_started = Instant::now();
        let corpus = self.corpus.read().await;
        let hits = corpus
            .index
            .search(&query_vector, options.top_k.saturating_mul(2))?;
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|hit| hit.score >= options.min_score)
            .filter_map(|hit| corpus.result_for(&hit.id, hit.score))
            .take(options.top_k)
            .collect();
        let key = options
            .use_cache
            .then(|| self.search_key(query, &corpus, options));
        let chunks_searched = corpus.chunks.len();
        drop(corpus);
        let retrieval_time = retrieval_started.elapsed();

        if let Some(key) = key {
            let hits: Vec<CachedHit> = results
                .iter()
                .map(|result| CachedHit {
                    chunk_id: result.chunk_id.clone(),
                    score: result.score,
                })
                .collect();
            if let Err(e) = self
                .cache
                .set_default(Namespace::SearchResults, &key, &hits)
                .await
            {
                warn!("Failed to cache search results: {}", e);
            }
        }

        debug!(
            "Search returned {} of {} chunks in {:?}",
            results.len(),
            chunks_searched,
            started.elapsed()
        );

        Ok(SearchOutcome {
            stats: SearchStats {
                embedding_time,
                retrieval_time,
                total_time: started.elapsed(),
                chunks_searched,
                chunks_retrieved: results.len(),
                tokens_used,
                from_cache: false,
            },
            results,
        })
    }

    /// Cached results for `query` at the current corpus state.
    ///
    /// An entry naming a chunk that no longer resolves counts as a miss.
    async fn cached_results(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Option<(Vec<SearchResult>, usize)> {
        let corpus = self.corpus.read().await;
        let key = self.search_key(query, &corpus, options);
        drop(corpus);

        let hits = self
            .cache
            .get::<Vec<CachedHit>>(Namespace::SearchResults, &key)
            .await?;

        let corpus = self.corpus.read().await;
        let results: Option<Vec<SearchResult>> = hits
            .iter()
            .map(|hit| corpus.result_for(&hit.chunk_id, hit.score))
            .collect();
        let chunks_searched = corpus.chunks.len();
        drop(corpus);

        if results.is_none() {
            debug!("Discarding cached results for {:?} with unknown chunks", query);
        }
        results.map(|results| (results, chunks_searched))
    }

    /// Rebuild the index when its size no longer matches the embedded chunks
    async fn ensure_consistent(&self) {
        {
            let corpus = self.corpus.read().await;
            if corpus.index.size() == corpus.embedded_count() {
                return;
            }
        }

        let mut corpus = self.corpus.write().await;
        let index_size = corpus.index.size();
        let chunk_count = corpus.embedded_count();
        if index_size == chunk_count {
            return;
        }

        warn!(
            "{}; rebuilding",
            RagError::CorpusInconsistency {
                index_size,
                chunk_count
            }
        );
        corpus.rebuild_index();
        corpus.revision += 1;
        let snapshot = corpus.snapshot(&self.provider);
        drop(corpus);

        self.persist_snapshot(&snapshot).await;
    }

    /// Format ranked results into a prompt context
    #[inline]
    pub fn build_context(results: &[SearchResult], max_chars: usize) -> String {
        build_context(results, max_chars)
    }

    #[inline]
    pub async fn remove_document(&self, document_id: &str) -> Result<bool> {
        let mut corpus = self.corpus.write().await;
        let Some(position) = corpus
            .documents
            .iter()
            .position(|document| document.id == document_id)
        else {
            return Ok(false);
        };

        let document = corpus.documents.remove(position);
        for chunk_id in &document.chunk_ids {
            corpus.index.remove(chunk_id);
        }
        corpus
            .chunks
            .retain(|chunk| chunk.document_id != document.id);
        corpus.refresh_positions();
        corpus.revision += 1;
        let snapshot = corpus.snapshot(&self.provider);
        drop(corpus);

        self.persist_snapshot(&snapshot).await;
        info!("Removed document {} ({})", document.name, document.id);
        Ok(true)
    }

    /// Drop every document and the saved snapshot
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        self.corpus.write().await.reset();

        self.cache
            .delete(Namespace::VectorIndex, &self.knowledge_base_id)
            .await?;
        info!("Cleared knowledge base {}", self.knowledge_base_id);
        Ok(())
    }

    #[inline]
    pub async fn documents(&self) -> Vec<Document> {
        self.corpus.read().await.documents.clone()
    }

    #[inline]
    pub async fn chunk_count(&self) -> usize {
        self.corpus.read().await.chunks.len()
    }

    #[inline]
    pub async fn revision(&self) -> u64 {
        self.corpus.read().await.revision
    }

    #[inline]
    pub async fn index_stats(&self) -> IndexStats {
        self.corpus.read().await.index.stats()
    }

    /// Backend requests made on behalf of this knowledge base
    #[inline]
    pub fn embedding_stats(&self) -> EmbeddingStats {
        self.provider.stats()
    }

    #[inline]
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats().await
    }

    fn search_key(&self, query: &str, corpus: &Corpus, options: &SearchOptions) -> String {
        cache_key(&[
            "search",
            query,
            &self.knowledge_base_id,
            &corpus.generation,
            &corpus.revision.to_string(),
            &options.top_k.to_string(),
            &options.min_score.to_bits().to_string(),
        ])
    }

    async fn persist_snapshot(&self, snapshot: &KnowledgeBaseSnapshot) {
        if let Err(e) = self
            .cache
            .set_default(Namespace::VectorIndex, &self.knowledge_base_id, snapshot)
            .await
        {
            warn!(
                "Failed to persist snapshot for {}: {}",
                self.knowledge_base_id, e
            );
        }
    }
}

impl Drop for RetrievalService {
    #[inline]
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.abort();
        }
    }
}
