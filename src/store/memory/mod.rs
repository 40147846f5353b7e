// In-process vector store. Records live for the lifetime of the store;
// vectors come from an injected vectorizer.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChunkRecord, CollectionSchema, HybridQuery, SearchHit, VectorStore};
use crate::config::StoreBackend;
use crate::vectorizer::Vectorizer;
use crate::{RagError, Result};

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

#[derive(Debug, Clone)]
struct StoredObject {
    id: Uuid,
    record: ChunkRecord,
    vector: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Collection {
    schema: CollectionSchema,
    objects: Vec<StoredObject>,
}

pub struct MemoryStore {
    vectorizer: Box<dyn Vectorizer>,
    collections: HashMap<String, Collection>,
    closed: bool,
}

impl MemoryStore {
    #[inline]
    pub fn new(vectorizer: Box<dyn Vectorizer>) -> Self {
        Self {
            vectorizer,
            collections: HashMap::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(RagError::Store("memory store is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn collection(&self, name: &str) -> Result<&Collection> {
        self.ensure_open()?;
        self.collections
            .get(name)
            .ok_or_else(|| RagError::CollectionNotFound(name.to_string()))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.ensure_open()?;
        self.collections
            .get_mut(name)
            .ok_or_else(|| RagError::CollectionNotFound(name.to_string()))
    }

    fn vectorize(
        &self,
        schema: &CollectionSchema,
        records: &[ChunkRecord],
    ) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = records
            .iter()
            .map(|record| vectorization_text(schema, record))
            .collect();
        let vectors = self.vectorizer.embed(&texts)?;
        if vectors.len() != records.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} vectors, got {}",
                records.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for MemoryStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl VectorStore for MemoryStore {
    #[inline]
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    #[inline]
    fn is_ready(&self) -> Result<bool> {
        Ok(!self.closed)
    }

    #[inline]
    fn collection_exists(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.collections.contains_key(name))
    }

    #[inline]
    fn create_collection(&mut self, schema: &CollectionSchema) -> Result<()> {
        self.ensure_open()?;
        if self.collections.contains_key(&schema.name) {
            return Err(RagError::Store(format!(
                "collection {} already exists",
                schema.name
            )));
        }

        self.collections.insert(
            schema.name.clone(),
            Collection {
                schema: schema.clone(),
                objects: Vec::new(),
            },
        );
        info!("Created collection {}", schema.name);
        Ok(())
    }

    #[inline]
    fn delete_collection(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        if self.collections.remove(name).is_none() {
            return Err(RagError::CollectionNotFound(name.to_string()));
        }
        info!("Deleted collection {}", name);
        Ok(())
    }

    #[inline]
    fn insert(&mut self, collection: &str, record: &ChunkRecord) -> Result<Uuid> {
        let ids = self.insert_batch(collection, std::slice::from_ref(record))?;
        ids.into_iter()
            .next()
            .ok_or_else(|| RagError::Store("insert produced no object id".to_string()))
    }

    /// Vectorizes the whole batch before storing any of it
    #[inline]
    fn insert_batch(&mut self, collection: &str, records: &[ChunkRecord]) -> Result<Vec<Uuid>> {
        let schema = self.collection(collection)?.schema.clone();
        let vectors = self.vectorize(&schema, records)?;

        let target = self.collection_mut(collection)?;
        let ids = records
            .iter()
            .zip(vectors)
            .map(|(record, vector)| {
                let id = Uuid::new_v4();
                target.objects.push(StoredObject {
                    id,
                    record: record.clone(),
                    vector,
                });
                id
            })
            .collect::<Vec<_>>();

        debug!("Stored {} records in {}", ids.len(), collection);
        Ok(ids)
    }

    #[inline]
    fn hybrid_query(&self, collection: &str, query: &HybridQuery) -> Result<Vec<SearchHit>> {
        query.validate()?;
        let target = self.collection(collection)?;
        if target.objects.is_empty() {
            return Ok(Vec::new());
        }

        let keyword_scores = if query.alpha < 1.0 {
            bm25_scores(&target.objects, &query.query, &query.properties)
        } else {
            HashMap::new()
        };

        let vector_scores = if query.alpha > 0.0 {
            let query_vector = self.vectorizer.embed_one(&query.query)?;
            target
                .objects
                .iter()
                .enumerate()
                .map(|(index, object)| {
                    cosine_similarity(&query_vector, &object.vector).map(|score| (index, score))
                })
                .collect::<Result<HashMap<_, _>>>()?
        } else {
            HashMap::new()
        };

        let keyword_scores = normalize(&keyword_scores);
        let vector_scores = normalize(&vector_scores);

        let candidates: HashSet<usize> = keyword_scores
            .keys()
            .chain(vector_scores.keys())
            .copied()
            .collect();

        let mut ranked: Vec<(usize, f32)> = (0..target.objects.len())
            .filter(|index| candidates.contains(index))
            .map(|index| {
                let vector = vector_scores.get(&index).copied().unwrap_or_default();
                let keyword = keyword_scores.get(&index).copied().unwrap_or_default();
                (index, query.alpha.mul_add(vector, (1.0 - query.alpha) * keyword))
            })
            .collect();

        // Stable sort: equal scores keep insertion order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(query.limit);

        Ok(ranked
            .into_iter()
            .filter_map(|(index, score)| {
                target.objects.get(index).map(|object| SearchHit {
                    id: object.id,
                    record: object.record.clone(),
                    score: Some(score),
                })
            })
            .collect())
    }

    #[inline]
    fn keyword_query(
        &self,
        collection: &str,
        substring: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let target = self.collection(collection)?;
        let needle = substring.to_lowercase();

        Ok(target
            .objects
            .iter()
            .filter(|object| object.record.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(|object| SearchHit {
                id: object.id,
                record: object.record.clone(),
                score: None,
            })
            .collect())
    }

    #[inline]
    fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.collection(collection)?.objects.len())
    }

    #[inline]
    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        debug!("Closed memory store");
        Ok(())
    }
}

fn vectorization_text(schema: &CollectionSchema, record: &ChunkRecord) -> String {
    schema
        .properties
        .iter()
        .filter(|property| property.vectorize)
        .filter_map(|property| {
            record.property(&property.name).map(|value| {
                if property.vectorize_property_name {
                    format!("{} {}", property.name, value)
                } else {
                    value.to_string()
                }
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(text: &str) -> impl Iterator<Item = String> {
    text.split_whitespace().map(str::to_lowercase)
}

/// BM25 scores of every object containing at least one query term
fn bm25_scores(
    objects: &[StoredObject],
    query: &str,
    properties: &[String],
) -> HashMap<usize, f32> {
    let documents: Vec<Vec<String>> = objects
        .iter()
        .map(|object| {
            properties
                .iter()
                .filter_map(|name| object.record.property(name))
                .flat_map(tokenize)
                .collect()
        })
        .collect();

    let document_count = documents.len() as f32;
    let average_length =
        documents.iter().map(Vec::len).sum::<usize>() as f32 / document_count.max(1.0);

    let mut terms: Vec<String> = tokenize(query).collect();
    terms.sort();
    terms.dedup();

    let mut scores = HashMap::new();
    for term in &terms {
        let containing = documents
            .iter()
            .filter(|tokens| tokens.contains(term))
            .count();
        if containing == 0 {
            continue;
        }
        let containing = containing as f32;
        let idf = ((document_count - containing + 0.5) / (containing + 0.5)).ln_1p();

        for (index, tokens) in documents.iter().enumerate() {
            let frequency = tokens.iter().filter(|token| *token == term).count();
            if frequency == 0 {
                continue;
            }
            let frequency = frequency as f32;
            let length_ratio = if average_length > 0.0 {
                tokens.len() as f32 / average_length
            } else {
                0.0
            };
            let norm = BM25_K1.mul_add(BM25_B.mul_add(length_ratio, 1.0 - BM25_B), frequency);
            let score = idf * frequency * (BM25_K1 + 1.0) / norm;
            *scores.entry(index).or_insert(0.0) += score;
        }
    }
    scores
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::Embedding(format!(
            "Vector dimensions differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot / (norm_a * norm_b))
    }
}

/// Min-max normalization into [0, 1]. A set with a single distinct score
/// normalizes to 1.
fn normalize(scores: &HashMap<usize, f32>) -> HashMap<usize, f32> {
    let min = scores.values().copied().fold(f32::INFINITY, f32::min);
    let max = scores.values().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    scores
        .iter()
        .map(|(&index, &score)| {
            let normalized = if range > 0.0 {
                (score - min) / range
            } else {
                1.0
            };
            (index, normalized)
        })
        .collect()
}
