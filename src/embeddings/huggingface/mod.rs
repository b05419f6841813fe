
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::EmbeddingSettings;
use crate::embeddings::models::EmbeddingModel;
use crate::embeddings::remote::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, send_with_retry};
use crate::{RagError, Result};

/// The inference API rejects long inputs, so text is cut to this many characters
pub const MAX_INPUT_CHARS: usize = 500;

/// Blocking client for the HuggingFace feature-extraction pipeline
#[derive(Debug, Clone)]
pub struct HuggingFaceEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a str,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    wait_for_model: bool,
}

/// Sentence models answer with one row per input, some with a bare vector
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtractionResponse {
    Rows(Vec<Vec<f32>>),
    Vector(Vec<f32>),
}

impl HuggingFaceEmbedder {
    #[inline]
    pub fn new(
        pipeline_url: &Url,
        model: &EmbeddingModel,
        api_key: Option<String>,
    ) -> Result<Self> {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            endpoint: model_endpoint(pipeline_url, model.id)?,
            model: model.id.to_string(),
            dimensions: model.dimensions,
            api_key,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn from_settings(settings: &EmbeddingSettings, model: &EmbeddingModel) -> Result<Self> {
        let pipeline_url = settings
            .huggingface_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self::new(&pipeline_url, model, settings.api_key.clone())?
            .with_timeout(Duration::from_secs(settings.timeout_seconds))
            .with_retry_attempts(settings.retry_attempts))
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[inline]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Request one embedding, blocking the calling thread until it arrives
    #[inline]
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs: String = text.chars().take(MAX_INPUT_CHARS).collect();
        debug!(
            "Requesting {} features for {} chars",
            self.model,
            inputs.chars().count()
        );

        let request = FeatureExtractionRequest {
            inputs: &inputs,
            options: RequestOptions {
                wait_for_model: true,
            },
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::EmbeddingBackend(format!("Failed to encode request: {e}")))?;

        let response_text = send_with_retry(&self.endpoint, self.retry_attempts, || {
            let mut request = self
                .agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }
            request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        self.parse_response(&response_text)
    }

    fn parse_response(&self, response_text: &str) -> Result<Vec<f32>> {
        let response: FeatureExtractionResponse =
            serde_json::from_str(response_text).map_err(|e| {
                RagError::EmbeddingBackend(format!(
                    "Unexpected HuggingFace response format: {e}"
                ))
            })?;

        let embedding = match response {
            FeatureExtractionResponse::Rows(rows) => rows.into_iter().next().ok_or_else(|| {
                RagError::EmbeddingBackend("HuggingFace response contained no rows".to_string())
            })?,
            FeatureExtractionResponse::Vector(vector) => vector,
        };

        if embedding.len() != self.dimensions {
            return Err(RagError::EmbeddingBackend(format!(
                "Model {} returned {} dimensions, expected {}",
                self.model,
                embedding.len(),
                self.dimensions
            )));
        }

        Ok(embedding)
    }
}

/// `{pipeline_url}/{model id}`, keeping the id's own `/` separators
fn model_endpoint(pipeline_url: &Url, model_id: &str) -> Result<Url> {
    let mut endpoint = pipeline_url.clone();
    endpoint
        .path_segments_mut()
        .map_err(|()| {
            RagError::Config(format!("Pipeline URL cannot hold a path: {pipeline_url}"))
        })?
        .pop_if_empty()
        .extend(model_id.split('/'));
    Ok(endpoint)
}
