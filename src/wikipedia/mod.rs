// Wikipedia article retrieval through the MediaWiki Action API


use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::WikipediaConfig;
use crate::http::{self, HttpResponse, RetryPolicy};
use crate::{RagError, Result};

/// A plain-text article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Title after redirects and normalization
    pub title: String,
    pub text: String,
    pub page_id: Option<u64>,
}

/// Anything that can turn a topic into a document
pub trait DocumentSource {
    /// Look up `topic`. A topic with no matching article is `Ok(None)`.
    fn fetch(&self, topic: &str) -> Result<Option<Document>>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: Option<QueryBody>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    info: String,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<Page>,
    #[serde(default)]
    redirects: Vec<Redirect>,
}

#[derive(Debug, Deserialize)]
struct Redirect {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    pageid: Option<u64>,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
}

#[derive(Debug, Clone)]
pub struct WikipediaClient {
    api_url: Url,
    language: String,
    agent: ureq::Agent,
    timeout: Duration,
    retry: RetryPolicy,
}

impl WikipediaClient {
    #[inline]
    pub fn new(config: &WikipediaConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;
        let api_url = config
            .api_url()
            .map_err(|e| RagError::Config(e.to_string()))?;
        let timeout = Duration::from_secs(config.timeout_seconds);

        Ok(Self {
            api_url,
            language: config.language.clone(),
            agent: http::build_agent(Some(&config.user_agent), Some(timeout)),
            timeout,
            retry: RetryPolicy::none(),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry = RetryPolicy::with_attempts(attempts);
        self
    }

    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[inline]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn extract_url(&self, topic: &str) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("action", "query")
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .append_pair("prop", "extracts")
            .append_pair("explaintext", "1")
            .append_pair("exsectionformat", "wiki")
            .append_pair("redirects", "1")
            .append_pair("titles", topic);
        url
    }

    fn get(&self, url: &Url) -> Result<HttpResponse> {
        http::execute(url.as_str(), self.retry, || {
            self.agent
                .get(url.as_str())
                .config()
                .timeout_global(Some(self.timeout))
                .build()
                .call()
                .and_then(http::read_response)
        })
        .and_then(|response| response.error_for_status(url.as_str()))
        .map_err(|e| e.into_rag_error(RagError::Fetch))
    }
}

impl DocumentSource for WikipediaClient {
    #[inline]
    fn fetch(&self, topic: &str) -> Result<Option<Document>> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(RagError::InvalidInput("topic must not be empty".to_string()));
        }

        let url = self.extract_url(topic);
        debug!(
            "Fetching Wikipedia ({}) article for {:?}",
            self.language, topic
        );

        let response = self.get(&url)?;
        let Some(document) = parse_extract_response(&response.body)? else {
            debug!("No article found for {:?}", topic);
            return Ok(None);
        };

        info!(
            "Fetched article {:?} ({} chars)",
            document.title,
            document.text.chars().count()
        );
        Ok(Some(document))
    }
}

fn parse_extract_response(body: &str) -> Result<Option<Document>> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| RagError::Fetch(format!("Failed to parse Wikipedia response: {e}")))?;

    if let Some(error) = response.error {
        return Err(RagError::Fetch(format!(
            "Wikipedia API error {}: {}",
            error.code, error.info
        )));
    }

    let Some(query) = response.query else {
        return Ok(None);
    };

    for redirect in &query.redirects {
        debug!("Followed redirect {:?} -> {:?}", redirect.from, redirect.to);
    }

    let document = query
        .pages
        .into_iter()
        .find(|page| !page.missing && !page.invalid)
        .map(|page| Document {
            title: page.title,
            text: page.extract.unwrap_or_default(),
            page_id: page.pageid,
        });

    Ok(document)
}
