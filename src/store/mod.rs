// Vector store gateway: the collection contract the pipeline relies on,
// the scoped session that owns a store connection, and the backends

pub mod memory;
pub mod weaviate;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::vectorizer::OllamaVectorizer;
use crate::{RagError, Result};

pub use memory::MemoryStore;
pub use weaviate::WeaviateStore;

pub const TITLE_PROPERTY: &str = "title";
pub const CONTENT_PROPERTY: &str = "content";

/// How a text property is split into searchable tokens
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tokenization {
    #[default]
    Lowercase,
    Word,
    Whitespace,
    Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySchema {
    pub name: String,
    /// Whether the property takes part in vectorization
    pub vectorize: bool,
    /// Whether the property name is vectorized along with the value
    pub vectorize_property_name: bool,
    pub tokenization: Tokenization,
}

impl PropertySchema {
    /// A vectorized, lowercase-tokenized text property
    #[inline]
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vectorize: true,
            vectorize_property_name: true,
            tokenization: Tokenization::Lowercase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    /// Vectorizer module the store applies to inserted records
    pub vectorizer: String,
    pub properties: Vec<PropertySchema>,
}

impl CollectionSchema {
    /// The `title` + `content` schema used for article chunks
    #[inline]
    pub fn for_chunks(name: &str, vectorizer: &str) -> Self {
        Self {
            name: name.to_string(),
            vectorizer: vectorizer.to_string(),
            properties: vec![
                PropertySchema::text(TITLE_PROPERTY),
                PropertySchema::text(CONTENT_PROPERTY),
            ],
        }
    }

    #[inline]
    pub fn vectorized_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|p| p.vectorize)
            .map(|p| p.name.as_str())
    }
}

/// One stored chunk of an article
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub title: String,
    pub content: String,
}

impl ChunkRecord {
    /// Record for the `part`-th chunk (1-indexed) of `source_title`
    #[inline]
    pub fn for_part(source_title: &str, part: usize, content: impl Into<String>) -> Self {
        Self {
            title: format!("{source_title} - Part {part}"),
            content: content.into(),
        }
    }

    /// Value of a named property, if the record has it
    #[inline]
    pub fn property(&self, name: &str) -> Option<&str> {
        match name {
            TITLE_PROPERTY => Some(&self.title),
            CONTENT_PROPERTY => Some(&self.content),
            _ => None,
        }
    }
}

/// A record returned by a query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: Uuid,
    pub record: ChunkRecord,
    /// Ranking score; absent for filter-only queries
    pub score: Option<f32>,
}

/// Parameters of a combined keyword and vector search
#[derive(Debug, Clone, PartialEq)]
pub struct HybridQuery {
    pub query: String,
    /// Properties searched by the keyword half of the query
    pub properties: Vec<String>,
    /// 0 is pure keyword ranking, 1 is pure vector ranking
    pub alpha: f32,
    pub limit: usize,
}

impl HybridQuery {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            properties: vec![CONTENT_PROPERTY.to_string()],
            alpha: 0.5,
            limit: 3,
        }
    }

    #[inline]
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    #[inline]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[inline]
    pub fn properties(mut self, properties: &[&str]) -> Self {
        self.properties = properties.iter().map(ToString::to_string).collect();
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(RagError::InvalidInput(format!(
                "alpha must be between 0 and 1, got {}",
                self.alpha
            )));
        }
        if self.limit == 0 {
            return Err(RagError::InvalidInput("limit must be positive".to_string()));
        }
        if self.properties.is_empty() {
            return Err(RagError::InvalidInput(
                "at least one property must be searched".to_string(),
            ));
        }
        Ok(())
    }
}

/// Operations on named collections of chunk records
pub trait VectorStore {
    fn backend(&self) -> StoreBackend;

    /// Whether the store accepts requests
    fn is_ready(&self) -> Result<bool>;

    fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create a collection. Fails if it already exists.
    fn create_collection(&mut self, schema: &CollectionSchema) -> Result<()>;

    /// Drop a collection and every record in it
    fn delete_collection(&mut self, name: &str) -> Result<()>;

    /// Append one record; the store computes its vector
    fn insert(&mut self, collection: &str, record: &ChunkRecord) -> Result<Uuid>;

    /// Append records in order. Stops at the first failure; records stored
    /// before it stay stored.
    #[inline]
    fn insert_batch(&mut self, collection: &str, records: &[ChunkRecord]) -> Result<Vec<Uuid>> {
        records
            .iter()
            .map(|record| self.insert(collection, record))
            .collect()
    }

    /// Hits in descending score order, at most `query.limit`
    fn hybrid_query(&self, collection: &str, query: &HybridQuery) -> Result<Vec<SearchHit>>;

    /// Records whose `content` contains `substring`, case-insensitively.
    ///
    /// Weaviate evaluates this as a `Like` filter over the lowercase tokens of
    /// `content`, so the substring has to fall inside a single word there: a
    /// multi-word substring such as `"Việt Nam"` matches nothing. A `*` or `?`
    /// in the substring matches any one character there.
    fn keyword_query(&self, collection: &str, substring: &str, limit: usize)
    -> Result<Vec<SearchHit>>;

    fn count(&self, collection: &str) -> Result<usize>;

    /// Release the connection
    fn close(&mut self) -> Result<()>;
}

impl fmt::Debug for dyn VectorStore {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VectorStore({})", self.backend())
    }
}

/// Build the store selected in the configuration
#[inline]
pub fn build_store(config: &Config) -> Result<Box<dyn VectorStore>> {
    match config.store.backend {
        StoreBackend::Weaviate => Ok(Box::new(WeaviateStore::new(&config.weaviate)?)),
        StoreBackend::Memory => {
            let vectorizer = OllamaVectorizer::new(&config.ollama)?;
            Ok(Box::new(MemoryStore::new(Box::new(vectorizer))))
        }
    }
}

/// Owns an open store and closes it exactly once, whether the session ends
/// through [`StoreSession::close`], an early return or unwinding
#[derive(Debug)]
pub struct StoreSession {
    store: Box<dyn VectorStore>,
    closed: bool,
}

impl StoreSession {
    /// Take ownership of `store` and check that it is ready
    #[inline]
    pub fn open(store: Box<dyn VectorStore>) -> Result<Self> {
        let backend = store.backend();
        let session = Self {
            store,
            closed: false,
        };

        if !session.store.is_ready()? {
            return Err(RagError::Store(format!("{backend} store is not ready")));
        }

        info!("Opened {} store session", backend);
        Ok(session)
    }

    /// Open a session, run `f` against the store, then close it
    #[inline]
    pub fn scope<T, F>(store: Box<dyn VectorStore>, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn VectorStore) -> Result<T>,
    {
        let mut session = Self::open(store)?;
        let result = f(session.store_mut());
        let closed = session.close();

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_error)) => Err(close_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(close_error)) => {
                warn!("Failed to close store after error: {}", close_error);
                Err(error)
            }
        }
    }

    #[inline]
    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut dyn VectorStore {
        self.store.as_mut()
    }

    #[inline]
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing {} store session", self.store.backend());
        self.store.close()
    }
}

impl Drop for StoreSession {
    #[inline]
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to close store: {}", e);
        }
    }
}
