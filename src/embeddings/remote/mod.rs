
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::EmbeddingSettings;
use crate::embeddings::models::EmbeddingModel;
use crate::{RagError, Result};

pub(crate) const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub(crate) const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
/// Longer inputs are cut before they are sent
pub const MAX_INPUT_CHARS: usize = 8000;

/// Blocking client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    #[inline]
    pub fn new(base_url: &Url, model: &EmbeddingModel, api_key: Option<String>) -> Result<Self> {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            endpoint: embeddings_endpoint(base_url)?,
            model: model.id.to_string(),
            dimensions: model.dimensions,
            api_key,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn from_settings(settings: &EmbeddingSettings, model: &EmbeddingModel) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| {
            RagError::Config(format!("Invalid embedding base URL '{}': {e}", settings.base_url))
        })?;

        Ok(Self::new(&base_url, model, settings.api_key.clone())?
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
        let input = truncate_input(text);
        debug!(
            "Requesting {} embedding for {} chars",
            self.model,
            input.chars().count()
        );

        let request = EmbeddingRequest {
            input: &input,
            model: &self.model,
            encoding_format: "float",
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
        let response: EmbeddingResponse = serde_json::from_str(response_text).map_err(|e| {
            RagError::EmbeddingBackend(format!("Failed to parse embedding response: {e}"))
        })?;

        let Some(data) = response.data.into_iter().next() else {
            return Err(RagError::EmbeddingBackend(
                "Embedding response contained no data".to_string(),
            ));
        };

        if data.embedding.len() != self.dimensions {
            return Err(RagError::EmbeddingBackend(format!(
                "Model {} returned {} dimensions, expected {}",
                self.model,
                data.embedding.len(),
                self.dimensions
            )));
        }

        debug!("Received embedding with {} dimensions", data.embedding.len());
        Ok(data.embedding)
    }
}

/// Run `request_fn` up to `retry_attempts` times.
///
/// Server errors and transport failures back off exponentially between
/// attempts. Client errors fail at once.
pub(crate) fn send_with_retry<F>(
    endpoint: &Url,
    retry_attempts: u32,
    mut request_fn: F,
) -> Result<String>
where
    F: FnMut() -> std::result::Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=retry_attempts {
        debug!("HTTP request attempt {}/{}", attempt, retry_attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                let should_retry = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, retry_attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(RagError::EmbeddingBackend(format!(
                                "Client error: HTTP {status}"
                            )));
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, retry_attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !should_retry {
                    return Err(RagError::EmbeddingBackend(format!(
                        "Non-retryable error: {error}"
                    )));
                }

                last_error = Some(RagError::EmbeddingBackend(format!(
                    "Request error: {error}"
                )));

                if attempt < retry_attempts {
                    let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                    let delay = Duration::from_millis(delay_ms);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", endpoint);

    Err(last_error.unwrap_or_else(|| {
        RagError::EmbeddingBackend("Request failed after retries".to_string())
    }))
}

fn embeddings_endpoint(base_url: &Url) -> Result<Url> {
    let mut endpoint = base_url.clone();
    endpoint
        .path_segments_mut()
        .map_err(|()| RagError::Config(format!("Base URL cannot hold a path: {base_url}")))?
        .pop_if_empty()
        .push("embeddings");
    Ok(endpoint)
}

fn truncate_input(text: &str) -> String {
    text.chars().take(MAX_INPUT_CHARS).collect()
}
