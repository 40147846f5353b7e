// Blocking HTTP plumbing shared by the Wikipedia, Weaviate, Ollama and
// chat-completion clients


use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::RagError;

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// A fully read HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: ureq::Error,
    },
}

impl HttpError {
    /// Status code of the response, if the server answered at all
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }

    /// Map into the crate error. Transport failures are network errors,
    /// rejected requests go through `on_status`.
    #[inline]
    pub fn into_rag_error(self, on_status: impl FnOnce(String) -> RagError) -> RagError {
        let message = self.to_string();
        match self {
            Self::Transport { .. } => RagError::Network(message),
            Self::Status { .. } => on_status(message),
        }
    }
}

impl HttpResponse {
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into an [`HttpError::Status`]
    #[inline]
    pub fn error_for_status(self, url: &str) -> Result<Self, HttpError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HttpError::Status {
                url: url.to_string(),
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// How many times a request is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries
    #[inline]
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_secs(1),
        }
    }

    #[inline]
    pub const fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Duration::from_secs(1),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self::none()
    }
}

/// Build an agent that reports HTTP error statuses as regular responses so
/// callers can inspect the body
#[inline]
pub fn build_agent(user_agent: Option<&str>, connect_timeout: Option<Duration>) -> ureq::Agent {
    let mut builder = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_connect(connect_timeout);
    if let Some(user_agent) = user_agent {
        builder = builder.user_agent(user_agent);
    }
    builder.build().into()
}

/// Read status and body out of a ureq response
#[inline]
pub fn read_response(
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<HttpResponse, ureq::Error> {
    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string()?;
    Ok(HttpResponse { status, body })
}

/// Run `request_fn` until it yields a response that is not a server error,
/// or the retry budget is spent
#[inline]
pub fn execute<F>(
    url: &str,
    policy: RetryPolicy,
    mut request_fn: F,
) -> Result<HttpResponse, HttpError>
where
    F: FnMut() -> Result<HttpResponse, ureq::Error>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, attempts, url);

        match request_fn() {
            Ok(response) if response.status >= 500 && attempt < attempts => {
                warn!(
                    "Server error (status {}) from {}, attempt {}/{}",
                    response.status, url, attempt, attempts
                );
                last_error = Some(HttpError::Status {
                    url: url.to_string(),
                    status: response.status,
                    body: response.body,
                });
            }
            Ok(response) => {
                debug!(
                    "Request to {} finished with status {} on attempt {}",
                    url, response.status, attempt
                );
                return Ok(response);
            }
            Err(error) => {
                let retryable = matches!(
                    error,
                    ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_)
                );
                if !retryable || attempt == attempts {
                    if attempts > 1 {
                        error!("All retry attempts failed for request to {}", url);
                    }
                    return Err(HttpError::Transport {
                        url: url.to_string(),
                        source: error,
                    });
                }
                warn!(
                    "Transport error: {}, attempt {}/{}",
                    error, attempt, attempts
                );
                last_error = Some(HttpError::Transport {
                    url: url.to_string(),
                    source: error,
                });
            }
        }

        let delay = policy.delay_for(attempt);
        debug!("Waiting {:?} before retry", delay);
        std::thread::sleep(delay);
    }

    Err(last_error.unwrap_or_else(|| HttpError::Transport {
        url: url.to_string(),
        source: ureq::Error::ConnectionFailed,
    }))
}
