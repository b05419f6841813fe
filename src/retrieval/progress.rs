use std::sync::atomic::{AtomicU8, Ordering};

pub const PARSED_PERCENT: u8 = 10;
pub const CHUNKED_PERCENT: u8 = 20;
pub const EMBEDDING_START_PERCENT: u8 = 30;
pub const EMBEDDING_END_PERCENT: u8 = 90;
pub const DONE_PERCENT: u8 = 100;

/// Callback receiving ingestion progress as a percentage
pub type ProgressObserver<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Forwards progress to an optional observer, dropping any value that would
/// move backwards or repeat the last one reported
pub struct ProgressTracker<'a> {
    observer: Option<ProgressObserver<'a>>,
    last: AtomicU8,
}

impl<'a> ProgressTracker<'a> {
    #[inline]
    pub const fn new(observer: Option<ProgressObserver<'a>>) -> Self {
        Self {
            observer,
            last: AtomicU8::new(0),
        }
    }

    #[inline]
    pub fn report(&self, percent: u8) {
        let percent = percent.min(DONE_PERCENT);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            if let Some(observer) = self.observer {
                observer(percent);
            }
        }
    }

    /// Maps `completed` of `total` embeddings onto the embedding band
    #[inline]
    pub fn embedding(&self, completed: usize, total: usize) {
        if total == 0 {
            self.report(EMBEDDING_END_PERCENT);
            return;
        }
        let band = usize::from(EMBEDDING_END_PERCENT - EMBEDDING_START_PERCENT);
        let step = completed.min(total) * band / total;
        let percent = usize::from(EMBEDDING_START_PERCENT) + step;
        self.report(u8::try_from(percent).unwrap_or(EMBEDDING_END_PERCENT));
    }

    #[inline]
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}
