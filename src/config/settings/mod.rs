
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;
use crate::pipeline::DEFAULT_PROMPT_TEMPLATE;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub weaviate: WeaviateConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub wikipedia: WikipediaConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Remote Weaviate instance, which vectorizes records itself
    #[default]
    Weaviate,
    /// In-process store, vectorized through Ollama. Nothing survives the process.
    Memory,
}

impl fmt::Display for StoreBackend {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weaviate => f.write_str("weaviate"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub collection: String,
    pub vectorizer: String,
    pub insert_batch_size: usize,
}

impl Default for StoreConfig {
    #[inline]
    fn default() -> Self {
        Self {
            backend: StoreBackend::Weaviate,
            collection: "VietnamCollection".to_string(),
            vectorizer: "text2vec-transformers".to_string(),
            insert_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WeaviateConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub grpc_port: u16,
    pub timeouts: TimeoutConfig,
}

impl Default for WeaviateConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            grpc_port: 50051,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Vector store time budgets, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub init: u64,
    pub query: u64,
    pub insert: u64,
}

impl Default for TimeoutConfig {
    #[inline]
    fn default() -> Self {
        Self {
            init: 30,
            query: 60,
            insert: 120,
        }
    }
}

impl TimeoutConfig {
    #[inline]
    pub fn init_duration(&self) -> Duration {
        Duration::from_secs(self.init)
    }

    #[inline]
    pub fn query_duration(&self) -> Duration {
        Duration::from_secs(self.query)
    }

    #[inline]
    pub fn insert_duration(&self) -> Duration {
        Duration::from_secs(self.insert)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WikipediaConfig {
    /// Wikipedia language edition, e.g. "vi" or "en"
    pub language: String,
    /// Client identification sent with every request
    pub user_agent: String,
    /// Overrides the `https://<language>.wikipedia.org/w/api.php` endpoint
    pub api_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for WikipediaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            language: "vi".to_string(),
            user_agent: concat!("wiki-rag/", env!("CARGO_PKG_VERSION")).to_string(),
            api_url: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base address of an OpenAI-compatible API, including the version path
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// No timeout unless set; the endpoint's own limits apply
    pub timeout_seconds: Option<u64>,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            api_key: "local".to_string(),
            model: "lmstudio-community/Meta-Llama-3-8B-Instruct-GGUF".to_string(),
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hybrid blend factor: 0 is pure keyword search, 1 is pure vector search
    pub alpha: f32,
    pub limit: usize,
    pub keyword_limit: usize,
    /// Template with `{context}` and `{question}` placeholders
    pub prompt_template: String,
    pub default_topic: String,
    pub default_question: String,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            alpha: 0.5,
            limit: 3,
            keyword_limit: 10,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            default_topic: "Việt Nam".to_string(),
            default_question: "Việt Nam có bao nhiêu người".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid insert batch size: {0} (must be between 1 and 10000)")]
    InvalidInsertBatchSize(usize),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid collection name: {0} (must start with an uppercase letter and contain only letters, digits and '_')")]
    InvalidCollectionName(String),
    #[error("Invalid vectorizer module: {0} (cannot be empty)")]
    InvalidVectorizer(String),
    #[error("Invalid {0} timeout: {1} (must be between 1 and 3600 seconds)")]
    InvalidTimeout(&'static str, u64),
    #[error("Invalid Wikipedia language code: {0}")]
    InvalidLanguage(String),
    #[error("User agent cannot be empty")]
    InvalidUserAgent,
    #[error("Invalid alpha: {0} (must be between 0 and 1)")]
    InvalidAlpha(f32),
    #[error("Invalid {0} limit: {1} (must be between 1 and 1000)")]
    InvalidLimit(&'static str, usize),
    #[error("Prompt template is missing the {0} placeholder")]
    InvalidPromptTemplate(&'static str),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("At least one chunk separator is required")]
    NoSeparators,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.wiki-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".wiki-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("wiki-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when
    /// the file does not exist
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the given directory, or the default one
    #[inline]
    pub fn load_from(config_dir: Option<&Path>) -> Result<Self> {
        match config_dir {
            Some(dir) => Self::load(dir),
            None => Self::load(Self::config_dir()?),
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.weaviate.validate()?;
        self.ollama.validate()?;
        self.wikipedia.validate()?;
        self.generation.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        Ok(())
    }
}

fn validate_endpoint(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    let url_str = format!("{}://{}:{}", protocol, host, port);
    let url = Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str.clone()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidUrl(url_str));
    }
    Ok(url)
}

fn validate_timeout(name: &'static str, seconds: u64) -> Result<(), ConfigError> {
    if (1..=3600).contains(&seconds) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimeout(name, seconds))
    }
}

fn validate_limit(name: &'static str, limit: usize) -> Result<(), ConfigError> {
    if (1..=1000).contains(&limit) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLimit(name, limit))
    }
}

/// Collection names double as GraphQL class names in Weaviate
#[inline]
pub fn is_valid_collection_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl StoreConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&self.collection) {
            return Err(ConfigError::InvalidCollectionName(self.collection.clone()));
        }
        if self.vectorizer.trim().is_empty() {
            return Err(ConfigError::InvalidVectorizer(self.vectorizer.clone()));
        }
        if !(1..=10_000).contains(&self.insert_batch_size) {
            return Err(ConfigError::InvalidInsertBatchSize(self.insert_batch_size));
        }
        Ok(())
    }

    #[inline]
    pub fn set_collection(&mut self, collection: String) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&collection) {
            return Err(ConfigError::InvalidCollectionName(collection));
        }
        self.collection = collection;
        Ok(())
    }
}

impl WeaviateConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.grpc_port == 0 {
            return Err(ConfigError::InvalidPort(self.grpc_port));
        }
        validate_timeout("init", self.timeouts.init)?;
        validate_timeout("query", self.timeouts.query)?;
        validate_timeout("insert", self.timeouts.insert)?;
        Ok(())
    }

    #[inline]
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &host, self.port)?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_grpc_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.grpc_port = port;
        Ok(())
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}

impl WikipediaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.language.is_empty()
            || !self
                .language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::InvalidLanguage(self.language.clone()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidUserAgent);
        }
        validate_timeout("wikipedia", self.timeout_seconds)?;
        self.api_url()?;
        Ok(())
    }

    /// The MediaWiki Action API endpoint for the configured language
    #[inline]
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let url_str = self.api_url.clone().unwrap_or_else(|| {
            format!("https://{}.wikipedia.org/w/api.php", self.language)
        });
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_language(&mut self, language: String) -> Result<(), ConfigError> {
        let candidate = Self {
            language: language.clone(),
            ..self.clone()
        };
        candidate.validate()?;
        self.language = language;
        Ok(())
    }
}

impl GenerationConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        if let Some(seconds) = self.timeout_seconds {
            validate_timeout("generation", seconds)?;
        }
        Ok(())
    }

    #[inline]
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }
        Ok(url)
    }

    #[inline]
    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let candidate = Self {
            base_url: base_url.clone(),
            ..self.clone()
        };
        candidate.base_url()?;
        self.base_url = base_url;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        validate_limit("query", self.limit)?;
        validate_limit("keyword", self.keyword_limit)?;
        if !self.prompt_template.contains("{context}") {
            return Err(ConfigError::InvalidPromptTemplate("{context}"));
        }
        if !self.prompt_template.contains("{question}") {
            return Err(ConfigError::InvalidPromptTemplate("{question}"));
        }
        Ok(())
    }

    #[inline]
    pub fn set_alpha(&mut self, alpha: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::InvalidAlpha(alpha));
        }
        self.alpha = alpha;
        Ok(())
    }
}
