// Ingestion and retrieval-augmented answering, one stage at a time


use std::fmt;
use tracing::{debug, error, info, warn};

use crate::chunking::{ChunkingConfig, TextSplitter};
use crate::config::{Config, RetrievalConfig};
use crate::generation::{ChatMessage, Generator};
use crate::store::{
    CONTENT_PROPERTY, ChunkRecord, CollectionSchema, HybridQuery, SearchHit, VectorStore,
};
use crate::wikipedia::{Document, DocumentSource};
use crate::{RagError, Result};

/// Instructs the model to answer from the retrieved context only, admit
/// ignorance, and keep a humorous tone, in Vietnamese
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Sử dụng CONTEXT sau để trả lời QUESTION ở cuối.
Nếu bạn không biết câu trả lời, chỉ cần trả lời không biết. Đừng cố bịa câu trả lời.
Hãy sử dụng tông giọng hài hước.

CONTEXT: {context}

QUESTION: {question}
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    EnsureCollection,
    FetchDocument,
    ChunkAndStore,
    Ready,
    Query,
    BuildPrompt,
    Generate,
    Done,
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::EnsureCollection => "ENSURE_COLLECTION",
            Self::FetchDocument => "FETCH_DOCUMENT",
            Self::ChunkAndStore => "CHUNK_AND_STORE",
            Self::Ready => "READY",
            Self::Query => "QUERY",
            Self::BuildPrompt => "BUILD_PROMPT",
            Self::Generate => "GENERATE",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// What `ensure_collection` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Created,
    /// An existing collection was dropped with all its records
    Recreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub topic: String,
    pub found: bool,
    /// Article title as resolved by the document source
    pub title: Option<String>,
    pub chunks_stored: usize,
    pub collection: CollectionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Retrieved contents, newline-joined
    pub context: String,
    pub question: String,
    /// The rendered template sent to the model
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub hits: Vec<SearchHit>,
    pub prompt: Prompt,
    pub completion: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub report: IngestReport,
    pub answer: Answer,
}

/// Everything the pipeline needs from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub collection: String,
    pub vectorizer: String,
    pub insert_batch_size: usize,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub model: String,
}

impl PipelineSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.store.collection.clone(),
            vectorizer: config.store.vectorizer.clone(),
            insert_batch_size: config.store.insert_batch_size,
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            model: config.generation.model.clone(),
        }
    }
}

impl Default for PipelineSettings {
    #[inline]
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Pipeline<'a> {
    store: &'a mut dyn VectorStore,
    source: &'a dyn DocumentSource,
    generator: &'a dyn Generator,
    splitter: TextSplitter,
    settings: PipelineSettings,
    stage: Stage,
}

impl fmt::Debug for Pipeline<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    #[inline]
    pub fn new(
        store: &'a mut dyn VectorStore,
        source: &'a dyn DocumentSource,
        generator: &'a dyn Generator,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let splitter = TextSplitter::new(settings.chunking.clone())?;
        if settings.insert_batch_size == 0 {
            return Err(RagError::Config("insert batch size must be positive".to_string()));
        }

        Ok(Self {
            store,
            source,
            generator,
            splitter,
            settings,
            stage: Stage::Start,
        })
    }

    /// The stage currently running, or the one that failed
    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Pipeline stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Create the collection, dropping any previous one first
    #[inline]
    pub fn ensure_collection(&mut self) -> Result<CollectionState> {
        self.enter(Stage::EnsureCollection);
        let name = self.settings.collection.clone();

        let state = if self.store.collection_exists(&name)? {
            info!("Collection {} already exists, recreating it", name);
            self.store.delete_collection(&name)?;
            CollectionState::Recreated
        } else {
            CollectionState::Created
        };

        let schema = CollectionSchema::for_chunks(&name, &self.settings.vectorizer);
        self.store.create_collection(&schema)?;
        Ok(state)
    }

    #[inline]
    pub fn fetch_document(&mut self, topic: &str) -> Result<Option<Document>> {
        self.enter(Stage::FetchDocument);
        let document = self.source.fetch(topic)?;
        if document.is_none() {
            warn!(
                "No article found for topic {:?}; nothing will be stored",
                topic
            );
        }
        Ok(document)
    }

    /// Chunk `text` and store every chunk as `"<title> - Part <n>"`.
    /// Returns the number of records stored. The first failed batch stops
    /// the run with the store's own error; earlier batches stay stored.
    #[inline]
    pub fn store_document(&mut self, title: &str, text: &str) -> Result<usize> {
        self.enter(Stage::ChunkAndStore);

        let records: Vec<ChunkRecord> = self
            .splitter
            .split_text(text)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .enumerate()
            .map(|(index, chunk)| ChunkRecord::for_part(title, index + 1, chunk))
            .collect();

        let total = records.len();
        debug!("Split {:?} into {} chunks", title, total);

        let mut stored = 0;
        for batch in records.chunks(self.settings.insert_batch_size) {
            match self.store.insert_batch(&self.settings.collection, batch) {
                Ok(ids) => stored += ids.len(),
                Err(e) => {
                    error!(
                        "Insert failed after {} of {} records were stored: {}",
                        stored, total, e
                    );
                    return Err(e);
                }
            }
        }

        info!("Stored {} chunks of {:?}", stored, title);
        Ok(stored)
    }

    /// Rebuild the collection from the article for `topic`
    #[inline]
    pub fn ingest(&mut self, topic: &str) -> Result<IngestReport> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(RagError::InvalidInput("topic must not be empty".to_string()));
        }

        let collection = self.ensure_collection()?;
        let document = self.fetch_document(topic)?;

        let report = match document {
            Some(document) => {
                let chunks_stored = self.store_document(topic, &document.text)?;
                IngestReport {
                    topic: topic.to_string(),
                    found: true,
                    title: Some(document.title),
                    chunks_stored,
                    collection,
                }
            }
            None => IngestReport {
                topic: topic.to_string(),
                found: false,
                title: None,
                chunks_stored: 0,
                collection,
            },
        };

        self.enter(Stage::Ready);
        Ok(report)
    }

    /// Hybrid search over chunk contents
    #[inline]
    pub fn retrieve(&mut self, question: &str) -> Result<Vec<SearchHit>> {
        self.enter(Stage::Query);
        let query = HybridQuery::new(question)
            .alpha(self.settings.retrieval.alpha)
            .limit(self.settings.retrieval.limit)
            .properties(&[CONTENT_PROPERTY]);

        let hits = self.store.hybrid_query(&self.settings.collection, &query)?;
        debug!("Retrieved {} chunks for {:?}", hits.len(), question);
        Ok(hits)
    }

    #[inline]
    pub fn build_prompt(&mut self, question: &str, hits: &[SearchHit]) -> Prompt {
        self.enter(Stage::BuildPrompt);
        let context = hits
            .iter()
            .map(|hit| hit.record.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let text = render_template(&self.settings.retrieval.prompt_template, &context, question);

        Prompt {
            context,
            question: question.to_string(),
            text,
        }
    }

    #[inline]
    pub fn generate(&mut self, prompt: &Prompt) -> Result<String> {
        self.enter(Stage::Generate);
        self.generator.complete(
            &self.settings.model,
            &[ChatMessage::user(prompt.text.as_str())],
        )
    }

    /// Retrieve, build the prompt and ask the model
    #[inline]
    pub fn answer(&mut self, question: &str) -> Result<Answer> {
        let hits = self.retrieve(question)?;
        let prompt = self.build_prompt(question, &hits);
        let completion = self.generate(&prompt)?;
        self.enter(Stage::Done);

        Ok(Answer {
            hits,
            prompt,
            completion,
        })
    }

    /// Records whose content contains `substring`
    #[inline]
    pub fn keyword_search(&self, substring: &str) -> Result<Vec<SearchHit>> {
        self.store.keyword_query(
            &self.settings.collection,
            substring,
            self.settings.retrieval.keyword_limit,
        )
    }

    /// Ingest `topic`, then answer `question` from it
    #[inline]
    pub fn run(&mut self, topic: &str, question: &str) -> Result<RunOutcome> {
        let report = self.ingest(topic)?;
        let answer = self.answer(question)?;
        Ok(RunOutcome { report, answer })
    }
}

/// Substitute `{context}` and `{question}` in one pass. Placeholders inside
/// the substituted values are left alone.
#[inline]
pub fn render_template(template: &str, context: &str, question: &str) -> String {
    let mut rendered = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;

    while let Some((before, after)) = rest.split_once('{') {
        rendered.push_str(before);
        if let Some(tail) = after.strip_prefix("context}") {
            rendered.push_str(context);
            rest = tail;
        } else if let Some(tail) = after.strip_prefix("question}") {
            rendered.push_str(question);
            rest = tail;
        } else {
            rendered.push('{');
            rest = after;
        }
    }
    rendered.push_str(rest);
    rendered
}
