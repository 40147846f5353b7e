#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::http::{self, HttpResponse, RetryPolicy};
use crate::{RagError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Turns text into embedding vectors
pub trait Vectorizer {
    /// Embed every text, preserving order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    #[inline]
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::Embedding("Vectorizer returned no embedding".to_string()))
    }
}

/// Embedding client for a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaVectorizer {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaVectorizer {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;
        let base_url = config
            .ollama_url()
            .map_err(|e| RagError::Config(format!("Failed to generate Ollama URL: {e}")))?;
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size,
            agent: http::build_agent(None, Some(timeout)),
            timeout,
            retry: RetryPolicy::with_attempts(DEFAULT_RETRY_ATTEMPTS),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry = RetryPolicy::with_attempts(attempts);
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the server answers and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.validate_model()?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models()?;

        // Ollama reports "name:tag"; accept a bare name for the latest tag
        let wanted = self.model.as_str();
        let available = models.iter().any(|m| {
            m.name == wanted || m.name.strip_suffix(":latest").is_some_and(|n| n == wanted)
        });

        if available {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, names
            );
            Err(RagError::Embedding(format!(
                "Model '{}' is not available. Available models: {:?}",
                self.model, names
            )))
        }
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("api/tags")?;
        debug!("Fetching available models from {}", url);

        let response = self.request(&url, None)?;
        let models: ModelsResponse = serde_json::from_str(&response.body)
            .map_err(|e| RagError::Embedding(format!("Failed to parse models response: {e}")))?;

        debug!("Found {} models", models.models.len());
        Ok(models.models)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("api/embed")?;
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| RagError::Embedding(format!("Failed to serialize request: {e}")))?;

        let response = self.request(&url, Some(&body))?;
        let parsed: EmbedResponse = serde_json::from_str(&response.body)
            .map_err(|e| RagError::Embedding(format!("Failed to parse embedding response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RagError::Config(format!("Failed to build Ollama URL: {e}")))
    }

    fn request(&self, url: &Url, body: Option<&str>) -> Result<HttpResponse> {
        http::execute(url.as_str(), self.retry, || {
            let response = body.map_or_else(
                || {
                    self.agent
                        .get(url.as_str())
                        .config()
                        .timeout_global(Some(self.timeout))
                        .build()
                        .call()
                },
                |body| {
                    self.agent
                        .post(url.as_str())
                        .config()
                        .timeout_global(Some(self.timeout))
                        .build()
                        .header("Content-Type", "application/json")
                        .send(body)
                },
            );
            response.and_then(http::read_response)
        })
        .and_then(|response| response.error_for_status(url.as_str()))
        .map_err(|e| e.into_rag_error(RagError::Embedding))
    }
}

impl Vectorizer for OllamaVectorizer {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1) as usize) {
            embeddings.extend(self.embed_single_batch(batch)?);
        }

        debug!("Generated {} embeddings total", embeddings.len());
        Ok(embeddings)
    }
}
