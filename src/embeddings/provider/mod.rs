
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::{CacheStore, Namespace, cache_key};
use crate::config::EmbeddingSettings;
use crate::embeddings::huggingface::HuggingFaceEmbedder;
use crate::embeddings::local::LocalEmbedder;
use crate::embeddings::models::{EmbeddingModel, ProviderKind, find_model};
use crate::embeddings::remote::RemoteEmbedder;
use crate::{RagError, Result};

/// Largest group [`EmbeddingProvider::embed_batch`] sends at once
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    Remote(RemoteEmbedder),
    HuggingFace(HuggingFaceEmbedder),
    Local(LocalEmbedder),
}

impl EmbeddingBackend {
    #[inline]
    pub fn for_model(model: &EmbeddingModel, settings: &EmbeddingSettings) -> Result<Self> {
        Ok(match model.provider {
            ProviderKind::RemoteApi => {
                Self::Remote(RemoteEmbedder::from_settings(settings, model)?)
            }
            ProviderKind::HuggingFace => {
                Self::HuggingFace(HuggingFaceEmbedder::from_settings(settings, model)?)
            }
            ProviderKind::LocalFallback => Self::Local(LocalEmbedder::new(model.dimensions)),
        })
    }

    #[inline]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Remote(_) => ProviderKind::RemoteApi,
            Self::HuggingFace(_) => ProviderKind::HuggingFace,
            Self::Local(_) => ProviderKind::LocalFallback,
        }
    }

    async fn compute(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Self::Remote(remote) => {
                let remote = remote.clone();
                let text = text.to_string();
                tokio::task::spawn_blocking(move || remote.embed(&text))
                    .await
                    .map_err(|e| RagError::EmbeddingBackend(format!("Embedding task failed: {e}")))?
            }
            Self::HuggingFace(hub) => {
                let hub = hub.clone();
                let text = text.to_string();
                tokio::task::spawn_blocking(move || hub.embed(&text))
                    .await
                    .map_err(|e| RagError::EmbeddingBackend(format!("Embedding task failed: {e}")))?
            }
            Self::Local(local) => Ok(local.embed(text)),
        }
    }
}

/// Running totals for the requests a provider sent to its backend.
///
/// Cache hits never reach the backend and are only counted in `cache_hits`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    pub total_requests: u64,
    pub errors: u64,
    pub fallbacks: u64,
    pub cache_hits: u64,
    /// Rough count at four characters per token
    pub total_tokens: u64,
    pub total_duration: Duration,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl EmbeddingStats {
    #[inline]
    pub fn average_duration(&self) -> Duration {
        let requests = u32::try_from(self.total_requests).unwrap_or(u32::MAX);
        if requests == 0 {
            return Duration::ZERO;
        }
        self.total_duration / requests
    }
}

/// Turns text into vectors for the active model.
///
/// Results are cached per model and text. When the backend fails and local
/// fallback is enabled the hashed embedding of the same width is returned
/// instead, and that substitute is never cached.
#[derive(Debug, Clone)]
pub struct EmbeddingProvider {
    model: &'static EmbeddingModel,
    backend: EmbeddingBackend,
    fallback: Option<LocalEmbedder>,
    cache: Option<CacheStore>,
    stats: Arc<Mutex<EmbeddingStats>>,
}

impl EmbeddingProvider {
    #[inline]
    pub fn new(model: &'static EmbeddingModel, backend: EmbeddingBackend) -> Self {
        Self {
            model,
            backend,
            fallback: Some(LocalEmbedder::new(model.dimensions)),
            cache: None,
            stats: Arc::new(Mutex::new(EmbeddingStats::default())),
        }
    }

    #[inline]
    pub fn from_settings(settings: &EmbeddingSettings, cache: Option<CacheStore>) -> Result<Self> {
        let model = find_model(&settings.model)?;
        let backend = EmbeddingBackend::for_model(model, settings)?;

        debug!(
            "Embedding with {} ({} dimensions, {:?})",
            model.id,
            model.dimensions,
            backend.kind()
        );

        let provider = Self::new(model, backend).with_fallback(settings.fallback_to_local);
        Ok(match cache {
            Some(cache) => provider.with_cache(cache),
            None => provider,
        })
    }

    #[inline]
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    #[inline]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback = if enabled {
            Some(LocalEmbedder::new(self.model.dimensions))
        } else {
            None
        };
        self
    }

    #[inline]
    pub const fn model(&self) -> &'static EmbeddingModel {
        self.model
    }

    #[inline]
    pub const fn dimensions(&self) -> usize {
        self.model.dimensions
    }

    /// Totals shared by every clone of this provider
    #[inline]
    pub fn stats(&self) -> EmbeddingStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = EmbeddingStats::default();
    }

    #[inline]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = cache_key(&[self.model.id, text]);

        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get::<Vec<f32>>(Namespace::Embeddings, &key).await {
                if vector.len() == self.dimensions() {
                    debug!("Embedding cache hit for {}", self.model.id);
                    self.record(|stats| stats.cache_hits += 1);
                    return Ok(vector);
                }
                warn!(
                    "Ignoring cached embedding with {} dimensions for {}",
                    vector.len(),
                    self.model.id
                );
            }
        }

        let started = Instant::now();
        let computed = self.backend.compute(text).await;
        let elapsed = started.elapsed();
        let tokens = text.chars().count().div_ceil(4) as u64;
        let failed = computed.is_err();
        self.record(|stats| {
            stats.total_requests += 1;
            stats.total_tokens += tokens;
            stats.total_duration += elapsed;
            stats.last_request_at = Some(Utc::now());
            if failed {
                stats.errors += 1;
            }
        });

        match computed {
            Ok(vector) => {
                self.store(&key, &vector).await;
                Ok(vector)
            }
            Err(RagError::EmbeddingBackend(message)) => match self.fallback {
                Some(local) => {
                    warn!(
                        "{} embedding failed ({}), using local fallback",
                        self.model.id, message
                    );
                    self.record(|stats| stats.fallbacks += 1);
                    Ok(local.embed(text))
                }
                None => Err(RagError::EmbeddingBackend(message)),
            },
            Err(e) => Err(e),
        }
    }

    fn record(&self, update: impl FnOnce(&mut EmbeddingStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Embed many texts, one result per input in input order
    #[inline]
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for group in texts.chunks(MAX_BATCH_SIZE) {
            results.extend(join_all(group.iter().map(|text| self.embed(text))).await);
        }
        results
    }

    async fn store(&self, key: &str, vector: &[f32]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.set_default(Namespace::Embeddings, key, vector).await {
            warn!("Failed to cache embedding: {}", e);
        }
    }
}
