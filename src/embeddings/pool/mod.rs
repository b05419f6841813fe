// Bounded-concurrency embedding of many texts with progress and cancellation

#[cfg(test)]
mod tests;

use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::config::EmbeddingSettings;
use crate::embeddings::provider::{EmbeddingProvider, MAX_BATCH_SIZE};
use crate::{RagError, Result};

pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 16;

/// Shared flag a caller flips to stop a long-running operation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs embedding requests in groups, with at most `workers` in flight.
///
/// Results come back in input order. A failed item does not stop the others;
/// cancellation is honoured between groups.
#[derive(Debug)]
pub struct WorkerPool {
    workers: usize,
    batch_size: usize,
    closed: AtomicBool,
}

impl WorkerPool {
    #[inline]
    pub fn new(workers: usize, batch_size: usize) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        debug!(
            "Starting embedding pool with {} workers, groups of {}",
            workers, batch_size
        );

        Self {
            workers,
            batch_size,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self::new(settings.workers, settings.batch_size)
    }

    #[inline]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Refuse further work; calls already running finish their current group
    #[inline]
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Embedding pool shut down");
        }
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Embed every text, calling `on_progress(completed, total)` after each one
    #[inline]
    pub async fn embed_all<F>(
        &self,
        provider: &EmbeddingProvider,
        texts: &[String],
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> Result<Vec<Result<Vec<f32>>>>
    where
        F: FnMut(usize, usize),
    {
        let total = texts.len();
        let mut results = Vec::with_capacity(total);

        for group in texts.chunks(self.batch_size) {
            if cancel.is_cancelled() || self.is_shut_down() {
                info!(
                    "Embedding stopped after {}/{} texts",
                    results.len(),
                    total
                );
                return Err(RagError::Cancelled);
            }

            let mut pending = stream::iter(group)
                .map(|text| provider.embed(text))
                .buffered(self.workers);

            while let Some(result) = pending.next().await {
                results.push(result);
                on_progress(results.len(), total);
            }
        }

        debug!("Embedded {} texts", total);
        Ok(results)
    }
}
