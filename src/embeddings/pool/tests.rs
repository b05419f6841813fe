use super::*;
use crate::embeddings::models::LOCAL_HASH_MODEL_ID;
use anyhow::Result;

fn local_provider() -> Result<EmbeddingProvider> {
    let settings = EmbeddingSettings {
        model: LOCAL_HASH_MODEL_ID.to_string(),
        ..EmbeddingSettings::default()
    };
    Ok(EmbeddingProvider::from_settings(&settings, None)?)
}

fn texts(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("chunk text number {i}")).collect()
}

#[test]
fn settings_are_clamped() {
    let pool = WorkerPool::new(0, 1000);
    assert_eq!(pool.workers(), 1);
    assert_eq!(pool.batch_size(), MAX_BATCH_SIZE);

    let pool = WorkerPool::new(64, 0);
    assert_eq!(pool.workers(), MAX_WORKERS);
    assert_eq!(pool.batch_size(), 1);
}

#[tokio::test]
async fn results_follow_input_order() -> Result<()> {
    let provider = local_provider()?;
    let pool = WorkerPool::new(4, 7);
    let inputs = texts(30);

    let results = pool
        .embed_all(&provider, &inputs, &CancelFlag::new(), |_, _| {})
        .await?;

    assert_eq!(results.len(), inputs.len());
    for (text, result) in inputs.iter().zip(results) {
        assert_eq!(result?, provider.embed(text).await?);
    }
    Ok(())
}

#[tokio::test]
async fn progress_is_reported_per_item() -> Result<()> {
    let provider = local_provider()?;
    let pool = WorkerPool::new(2, 5);
    let inputs = texts(12);

    let mut seen = Vec::new();
    pool.embed_all(&provider, &inputs, &CancelFlag::new(), |done, total| {
        seen.push((done, total));
    })
    .await?;

    let expected: Vec<(usize, usize)> = (1..=12).map(|done| (done, 12)).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_between_groups() -> Result<()> {
    let provider = local_provider()?;
    let pool = WorkerPool::new(1, 4);
    let inputs = texts(20);
    let cancel = CancelFlag::new();

    let mut completed = 0;
    let result = pool
        .embed_all(&provider, &inputs, &cancel, |done, _| {
            completed = done;
            if done == 6 {
                cancel.cancel();
            }
        })
        .await;

    assert!(matches!(result, Err(RagError::Cancelled)));
    assert_eq!(completed, 8);
    Ok(())
}

#[tokio::test]
async fn shut_down_pool_refuses_work() -> Result<()> {
    let provider = local_provider()?;
    let pool = WorkerPool::new(2, 10);
    pool.shutdown();
    pool.shutdown();

    assert!(pool.is_shut_down());
    let result = pool
        .embed_all(&provider, &texts(3), &CancelFlag::new(), |_, _| {})
        .await;
    assert!(matches!(result, Err(RagError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn empty_input_is_fine() -> Result<()> {
    let provider = local_provider()?;
    let pool = WorkerPool::new(2, 10);

    let results = pool
        .embed_all(&provider, &[], &CancelFlag::new(), |_, _| {})
        .await?;
    assert!(results.is_empty());
    Ok(())
}
