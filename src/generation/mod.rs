// Client for OpenAI-compatible chat-completion servers such as LM Studio


use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GenerationConfig;
use crate::http::{self, HttpResponse, RetryPolicy};
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Produces a completion for a conversation
pub trait Generator {
    fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: Url,
    api_key: String,
    agent: ureq::Agent,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;
        let base_url = config
            .base_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            base_url: with_trailing_slash(base_url),
            api_key: config.api_key.clone(),
            agent: http::build_agent(None, None),
            timeout: config.timeout_seconds.map(Duration::from_secs),
            retry: RetryPolicy::none(),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry = RetryPolicy::with_attempts(attempts);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Models the server currently offers
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelEntry>> {
        let url = self.endpoint("models")?;
        debug!("Fetching available models from {}", url);

        let response = self.request(&url, None)?;
        let models: ModelList = serde_json::from_str(&response.body)
            .map_err(|e| RagError::Generation(format!("Failed to parse models response: {e}")))?;

        debug!("Found {} models", models.data.len());
        Ok(models.data)
    }

    /// Check that the server answers. A missing model is only a warning:
    /// servers like LM Studio load models on demand.
    #[inline]
    pub fn health_check(&self, model: &str) -> Result<()> {
        let models = self.list_models()?;
        if models.iter().any(|m| m.id == model) {
            info!("Model {} is available at {}", model, self.base_url);
        } else {
            let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
            warn!(
                "Model {} not listed by server. Available models: {:?}",
                model, ids
            );
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RagError::Config(format!("Failed to build generation URL: {e}")))
    }

    fn request(&self, url: &Url, body: Option<&str>) -> Result<HttpResponse> {
        let authorization = format!("Bearer {}", self.api_key);
        http::execute(url.as_str(), self.retry, || {
            let response = body.map_or_else(
                || {
                    self.agent
                        .get(url.as_str())
                        .config()
                        .timeout_global(self.timeout)
                        .build()
                        .header("Authorization", &authorization)
                        .call()
                },
                |body| {
                    self.agent
                        .post(url.as_str())
                        .config()
                        .timeout_global(self.timeout)
                        .build()
                        .header("Authorization", &authorization)
                        .header("Content-Type", "application/json")
                        .send(body)
                },
            );
            response.and_then(http::read_response)
        })
        .and_then(|response| response.error_for_status(url.as_str()))
        .map_err(|e| e.into_rag_error(RagError::Generation))
    }
}

impl Generator for ChatClient {
    #[inline]
    fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        if messages.is_empty() {
            return Err(RagError::InvalidInput("at least one message is required".to_string()));
        }

        let url = self.endpoint("chat/completions")?;
        let request = CompletionRequest {
            model,
            messages,
            stream: false,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| RagError::Generation(format!("Failed to serialize request: {e}")))?;

        debug!(
            "Requesting completion from {} with {} messages",
            model,
            messages.len()
        );
        let response = self.request(&url, Some(&body))?;
        let completion = parse_completion(&response.body)?;

        info!("Received completion ({} chars)", completion.chars().count());
        Ok(completion)
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_completion(body: &str) -> Result<String> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| RagError::Generation(format!("Failed to parse completion response: {e}")))?;

    response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Generation("Completion response has no choices".to_string()))?
        .message
        .content
        .ok_or_else(|| RagError::Generation("Completion has no content".to_string()))
}
