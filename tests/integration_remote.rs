#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Remote embedding backends against mock OpenAI-compatible and HuggingFace servers

use anyhow::Result;
use nexus_rag::RagError;
use nexus_rag::cache::{CacheSettings, CacheStore};
use nexus_rag::config::{Config, EmbeddingSettings};
use nexus_rag::embeddings::{EmbeddingProvider, LocalEmbedder, ProviderKind};
use nexus_rag::retrieval::{IngestFile, RetrievalService, SearchOptions};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "text-embedding-3-small";
const WIDTH: usize = 1536;
const HUB_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
const HUB_WIDTH: usize = 384;
const HUB_PATH: &str = "/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2";

fn settings(server: &MockServer, fallback: bool, retry_attempts: u32) -> EmbeddingSettings {
    EmbeddingSettings {
        model: MODEL.to_string(),
        base_url: format!("{}/v1", server.uri()),
        api_key: Some("test-key".to_string()),
        retry_attempts,
        timeout_seconds: 5,
        fallback_to_local: fallback,
        ..EmbeddingSettings::default()
    }
}

fn hub_settings(server: &MockServer, fallback: bool, retry_attempts: u32) -> EmbeddingSettings {
    EmbeddingSettings {
        model: HUB_MODEL.to_string(),
        huggingface_url: format!("{}/pipeline/feature-extraction", server.uri()),
        api_key: Some("hf-token".to_string()),
        retry_attempts,
        timeout_seconds: 5,
        fallback_to_local: fallback,
        ..EmbeddingSettings::default()
    }
}

fn hub_vector(width: usize) -> Vec<f32> {
    (0..width).map(|i| if i % 5 == 0 { 0.4 } else { 0.02 }).collect()
}

fn embedding_body(width: usize) -> serde_json::Value {
    let vector: Vec<f32> = (0..width).map(|i| if i % 7 == 0 { 0.5 } else { 0.01 }).collect();
    json!({
        "object": "list",
        "data": [{ "object": "embedding", "index": 0, "embedding": vector }],
        "model": MODEL,
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_embedding_is_requested_and_cached() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": MODEL, "encoding_format": "float" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(WIDTH)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = CacheStore::in_memory(CacheSettings::default()).await?;
    let provider =
        EmbeddingProvider::from_settings(&settings(&server, false, 1), Some(cache.clone()))?;
    assert_eq!(provider.model().provider, ProviderKind::RemoteApi);

    let first = provider.embed("hello remote").await?;
    let second = provider.embed("hello remote").await?;

    assert_eq!(first.len(), WIDTH);
    assert_eq!(first, second);
    assert_eq!(cache.stats().await?.embeddings, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_falls_back_to_local_without_caching() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let cache = CacheStore::in_memory(CacheSettings::default()).await?;
    let provider =
        EmbeddingProvider::from_settings(&settings(&server, true, 2), Some(cache.clone()))?;

    let vector = provider.embed("fallback please").await?;
    assert_eq!(vector.len(), WIDTH);
    assert_eq!(cache.stats().await?.embeddings, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn client_error_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let provider = EmbeddingProvider::from_settings(&settings(&server, false, 3), None)?;

    let result = provider.embed("unauthorized").await;
    assert!(matches!(result, Err(RagError::EmbeddingBackend(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_width_response_is_a_backend_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(WIDTH / 2)))
        .mount(&server)
        .await;

    let strict = EmbeddingProvider::from_settings(&settings(&server, false, 1), None)?;
    assert!(matches!(
        strict.embed("narrow").await,
        Err(RagError::EmbeddingBackend(_))
    ));

    let lenient = EmbeddingProvider::from_settings(&settings(&server, true, 1), None)?;
    assert_eq!(lenient.embed("narrow").await?.len(), WIDTH);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ingestion_survives_backend_outage() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.embedding = settings(&server, true, 1);

    let cache = CacheStore::in_memory(config.cache).await?;
    let provider = EmbeddingProvider::from_settings(&config.embedding, Some(cache.clone()))?;
    let service = RetrievalService::new("remote-kb", provider, cache, &config);

    let outcome = service
        .ingest(IngestFile::from_text("outage.txt", &"embedding outage drill ".repeat(60)))
        .await?;
    assert!(outcome.chunks.iter().all(|chunk| chunk.embedding.is_some()));

    let search = service
        .search("outage drill", &SearchOptions::default())
        .await?;
    assert!(!search.results.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn hub_model_posts_features_request_and_caches_first_row() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HUB_PATH))
        .and(header("authorization", "Bearer hf-token"))
        .and(body_partial_json(json!({
            "inputs": "hello hub",
            "options": { "wait_for_model": true }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([hub_vector(HUB_WIDTH), vec![0.0_f32; HUB_WIDTH]])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = CacheStore::in_memory(CacheSettings::default()).await?;
    let provider =
        EmbeddingProvider::from_settings(&hub_settings(&server, false, 1), Some(cache.clone()))?;
    assert_eq!(provider.model().provider, ProviderKind::HuggingFace);

    let first = provider.embed("hello hub").await?;
    let second = provider.embed("hello hub").await?;

    assert_eq!(first, hub_vector(HUB_WIDTH));
    assert_eq!(first, second);
    assert_eq!(cache.stats().await?.embeddings, 1);

    let stats = provider.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.errors, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn hub_input_is_truncated_and_flat_vector_accepted() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HUB_PATH))
        .and(body_partial_json(json!({ "inputs": "a".repeat(500) })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(hub_vector(HUB_WIDTH))))
        .expect(1)
        .mount(&server)
        .await;

    let provider = EmbeddingProvider::from_settings(&hub_settings(&server, false, 1), None)?;
    let vector = provider.embed(&"a".repeat(800)).await?;
    assert_eq!(vector, hub_vector(HUB_WIDTH));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn hub_unexpected_body_is_an_error_or_falls_back() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HUB_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "Model is loading" })),
        )
        .mount(&server)
        .await;

    let strict = EmbeddingProvider::from_settings(&hub_settings(&server, false, 1), None)?;
    assert!(matches!(
        strict.embed("loading").await,
        Err(RagError::EmbeddingBackend(_))
    ));
    assert_eq!(strict.stats().errors, 1);

    let lenient = EmbeddingProvider::from_settings(&hub_settings(&server, true, 1), None)?;
    let vector = lenient.embed("loading").await?;
    assert_eq!(vector, LocalEmbedder::new(HUB_WIDTH).embed("loading"));
    assert_eq!(lenient.stats().fallbacks, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn hub_server_error_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HUB_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let provider = EmbeddingProvider::from_settings(&hub_settings(&server, false, 2), None)?;
    assert!(matches!(
        provider.embed("busy hub").await,
        Err(RagError::EmbeddingBackend(_))
    ));
    Ok(())
}
