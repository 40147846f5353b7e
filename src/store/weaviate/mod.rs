// Weaviate backend over the REST and GraphQL APIs


use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::{
    CONTENT_PROPERTY, ChunkRecord, CollectionSchema, HybridQuery, SearchHit, VectorStore,
};
use crate::config::{
    StoreBackend, TimeoutConfig, WeaviateConfig, settings::is_valid_collection_name,
};
use crate::http::{self, HttpResponse, RetryPolicy};
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassDefinition<'a> {
    class: &'a str,
    vectorizer: &'a str,
    properties: Vec<PropertyDefinition<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDefinition<'a> {
    name: &'a str,
    data_type: [&'static str; 1],
    tokenization: super::Tokenization,
    module_config: Value,
}

#[derive(Debug, Serialize)]
struct ObjectPayload<'a> {
    class: &'a str,
    id: Uuid,
    properties: &'a ChunkRecord,
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    result: Option<BatchResult>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GetObject {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(rename = "_additional")]
    additional: Additional,
}

#[derive(Debug, Deserialize)]
struct Additional {
    id: Uuid,
    /// Weaviate reports hybrid scores as strings
    #[serde(default)]
    score: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    version: String,
}

#[derive(Debug, Clone)]
pub struct WeaviateStore {
    base_url: Url,
    grpc_port: u16,
    agent: ureq::Agent,
    timeouts: TimeoutConfig,
    retry: RetryPolicy,
    closed: bool,
}

impl WeaviateStore {
    #[inline]
    pub fn new(config: &WeaviateConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;
        let base_url = config
            .base_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            grpc_port: config.grpc_port,
            agent: http::build_agent(None, Some(config.timeouts.init_duration())),
            timeouts: config.timeouts,
            retry: RetryPolicy::none(),
            closed: false,
        })
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

    #[inline]
    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Server version from `/v1/meta`
    #[inline]
    pub fn version(&self) -> Result<String> {
        let url = self.endpoint("v1/meta")?;
        let response = self.send(Method::Get, &url, None, self.timeouts.init_duration())?;
        let response = ensure_success(response, &url)?;
        let meta: MetaResponse = parse_json(&response.body, "meta")?;
        Ok(meta.version)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(RagError::Store("Weaviate client is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RagError::Config(format!("Failed to build Weaviate URL: {e}")))
    }

    fn class_endpoint(&self, name: &str) -> Result<Url> {
        checked_class_name(name)?;
        self.endpoint(&format!("v1/schema/{name}"))
    }

    fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        self.ensure_open()?;
        debug!("{:?} {}", method, url);

        http::execute(url.as_str(), self.retry, || {
            let response = match method {
                Method::Get => self
                    .agent
                    .get(url.as_str())
                    .config()
                    .timeout_global(Some(timeout))
                    .build()
                    .call(),
                Method::Delete => self
                    .agent
                    .delete(url.as_str())
                    .config()
                    .timeout_global(Some(timeout))
                    .build()
                    .call(),
                Method::Post => self
                    .agent
                    .post(url.as_str())
                    .config()
                    .timeout_global(Some(timeout))
                    .build()
                    .header("Content-Type", "application/json")
                    .send(body.unwrap_or("{}")),
            };
            response.and_then(http::read_response)
        })
        .map_err(|e| e.into_rag_error(RagError::Store))
    }

    fn post_json<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let url = self.endpoint(path)?;
        let body = serde_json::to_string(payload)
            .map_err(|e| RagError::Store(format!("Failed to serialize request: {e}")))?;
        let response = self.send(Method::Post, &url, Some(&body), timeout)?;
        ensure_success(response, &url)
    }

    fn graphql(&self, query: &str) -> Result<Value> {
        let response = self.post_json(
            "v1/graphql",
            &json!({ "query": query }),
            self.timeouts.query_duration(),
        )?;
        parse_graphql_response(&response.body)
    }
}

impl VectorStore for WeaviateStore {
    #[inline]
    fn backend(&self) -> StoreBackend {
        StoreBackend::Weaviate
    }

    #[inline]
    fn is_ready(&self) -> Result<bool> {
        let url = self.endpoint("v1/.well-known/ready")?;
        let response = self.send(Method::Get, &url, None, self.timeouts.init_duration())?;
        Ok(response.is_success())
    }

    #[inline]
    fn collection_exists(&self, name: &str) -> Result<bool> {
        let url = self.class_endpoint(name)?;
        let response = self.send(Method::Get, &url, None, self.timeouts.init_duration())?;
        match response.status {
            404 => Ok(false),
            _ => ensure_success(response, &url).map(|_| true),
        }
    }

    #[inline]
    fn create_collection(&mut self, schema: &CollectionSchema) -> Result<()> {
        checked_class_name(&schema.name)?;
        let definition = class_definition(schema);
        self.post_json("v1/schema", &definition, self.timeouts.init_duration())?;
        info!("Created collection {}", schema.name);
        Ok(())
    }

    #[inline]
    fn delete_collection(&mut self, name: &str) -> Result<()> {
        let url = self.class_endpoint(name)?;
        let response = self.send(Method::Delete, &url, None, self.timeouts.init_duration())?;
        if response.status == 404 {
            return Err(RagError::CollectionNotFound(name.to_string()));
        }
        ensure_success(response, &url)?;
        info!("Deleted collection {}", name);
        Ok(())
    }

    #[inline]
    fn insert(&mut self, collection: &str, record: &ChunkRecord) -> Result<Uuid> {
        checked_class_name(collection)?;
        let id = Uuid::new_v4();
        let payload = ObjectPayload {
            class: collection,
            id,
            properties: record,
        };
        self.post_json("v1/objects", &payload, self.timeouts.insert_duration())?;
        debug!("Inserted {} into {}", record.title, collection);
        Ok(id)
    }

    #[inline]
    fn insert_batch(&mut self, collection: &str, records: &[ChunkRecord]) -> Result<Vec<Uuid>> {
        checked_class_name(collection)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = records.iter().map(|_| Uuid::new_v4()).collect();
        let objects: Vec<ObjectPayload<'_>> = records
            .iter()
            .zip(&ids)
            .map(|(record, &id)| ObjectPayload {
                class: collection,
                id,
                properties: record,
            })
            .collect();

        let response = self.post_json(
            "v1/batch/objects",
            &json!({ "objects": objects }),
            self.timeouts.insert_duration(),
        )?;
        let results: Vec<BatchObjectResult> = parse_json(&response.body, "batch")?;
        check_batch_results(&results)?;

        debug!("Batch inserted {} records into {}", ids.len(), collection);
        Ok(ids)
    }

    #[inline]
    fn hybrid_query(&self, collection: &str, query: &HybridQuery) -> Result<Vec<SearchHit>> {
        checked_class_name(collection)?;
        query.validate()?;
        let data = self
            .graphql(&hybrid_graphql(collection, query))
            .map_err(|e| not_found_for(e, collection))?;
        parse_get_hits(&data, collection)
    }

    #[inline]
    fn keyword_query(
        &self,
        collection: &str,
        substring: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        checked_class_name(collection)?;
        let data = self
            .graphql(&like_graphql(collection, substring, limit))
            .map_err(|e| not_found_for(e, collection))?;
        let mut hits = parse_get_hits(&data, collection)?;
        for hit in &mut hits {
            hit.score = None;
        }
        Ok(hits)
    }

    #[inline]
    fn count(&self, collection: &str) -> Result<usize> {
        checked_class_name(collection)?;
        let query = format!("{{ Aggregate {{ {collection} {{ meta {{ count }} }} }} }}");
        let data = self
            .graphql(&query)
            .map_err(|e| not_found_for(e, collection))?;

        data.pointer(&format!("/Aggregate/{collection}/0/meta/count"))
            .and_then(Value::as_u64)
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| {
                RagError::Store(format!("Unexpected aggregate response for {collection}"))
            })
    }

    #[inline]
    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        debug!("Closed Weaviate client for {}", self.base_url);
        Ok(())
    }
}

fn checked_class_name(name: &str) -> Result<()> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(RagError::InvalidInput(format!(
            "invalid collection name: {name:?}"
        )))
    }
}

fn ensure_success(response: HttpResponse, url: &Url) -> Result<HttpResponse> {
    response
        .error_for_status(url.as_str())
        .map_err(|e| e.into_rag_error(RagError::Store))
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &str, what: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| RagError::Store(format!("Failed to parse {what} response: {e}")))
}

fn class_definition(schema: &CollectionSchema) -> ClassDefinition<'_> {
    ClassDefinition {
        class: &schema.name,
        vectorizer: &schema.vectorizer,
        properties: schema
            .properties
            .iter()
            .map(|property| {
                let mut module_config = Map::new();
                module_config.insert(
                    schema.vectorizer.clone(),
                    json!({
                        "skip": !property.vectorize,
                        "vectorizePropertyName": property.vectorize_property_name,
                    }),
                );
                PropertyDefinition {
                    name: &property.name,
                    data_type: ["text"],
                    tokenization: property.tokenization,
                    module_config: Value::Object(module_config),
                }
            })
            .collect(),
    }
}

/// A GraphQL string literal; JSON string escaping is a subset GraphQL accepts
fn graphql_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn hybrid_graphql(collection: &str, query: &HybridQuery) -> String {
    let properties = query
        .properties
        .iter()
        .map(|p| graphql_string(p))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{{ Get {{ {collection}(hybrid: {{query: {query}, alpha: {alpha}, properties: [{properties}]}}, limit: {limit}) {{ title content _additional {{ id score }} }} }} }}",
        query = graphql_string(&query.query),
        alpha = query.alpha,
        limit = query.limit,
    )
}

/// `Like` has no escape syntax, so a literal `*` or `?` becomes the
/// single-character wildcard `?` and still matches itself.
fn like_pattern(substring: &str) -> String {
    let literal: String = substring
        .chars()
        .map(|c| if matches!(c, '*' | '?') { '?' } else { c })
        .collect();
    format!("*{literal}*")
}

fn like_graphql(collection: &str, substring: &str, limit: usize) -> String {
    format!(
        "{{ Get {{ {collection}(where: {{path: [{path}], operator: Like, valueText: {value}}}, limit: {limit}) {{ title content _additional {{ id }} }} }} }}",
        path = graphql_string(CONTENT_PROPERTY),
        value = graphql_string(&like_pattern(substring)),
    )
}

fn parse_graphql_response(body: &str) -> Result<Value> {
    let response: GraphQlResponse = parse_json(body, "GraphQL")?;
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(RagError::Store(format!(
            "GraphQL query failed: {}",
            messages.join("; ")
        )));
    }
    response
        .data
        .ok_or_else(|| RagError::Store("GraphQL response has no data".to_string()))
}

/// Weaviate reports an unknown class as an unknown GraphQL field
fn not_found_for(error: RagError, collection: &str) -> RagError {
    match error {
        RagError::Store(message) if message.contains("Cannot query field") => {
            warn!("Collection {} does not exist: {}", collection, message);
            RagError::CollectionNotFound(collection.to_string())
        }
        other => other,
    }
}

fn parse_get_hits(data: &Value, collection: &str) -> Result<Vec<SearchHit>> {
    let objects = data
        .pointer(&format!("/Get/{collection}"))
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    let objects: Vec<GetObject> = serde_json::from_value(objects)
        .map_err(|e| RagError::Store(format!("Unexpected Get response: {e}")))?;

    Ok(objects
        .into_iter()
        .map(|object| SearchHit {
            id: object.additional.id,
            record: ChunkRecord {
                title: object.title.unwrap_or_default(),
                content: object.content.unwrap_or_default(),
            },
            score: object
                .additional
                .score
                .and_then(|score| score.parse::<f32>().ok()),
        })
        .collect())
}

fn check_batch_results(results: &[BatchObjectResult]) -> Result<()> {
    let failures: Vec<String> = results
        .iter()
        .filter_map(|result| {
            let errors = result.result.as_ref()?.errors.as_ref()?;
            let message = errors
                .error
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            let prefix = result.id.map(|id| format!("{id}: ")).unwrap_or_default();
            Some(format!("{prefix}{message}"))
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        let stored = results.len() - failures.len();
        Err(RagError::Store(format!(
            "{} of {} batch objects failed ({} stored): {}",
            failures.len(),
            results.len(),
            stored,
            failures.join(", ")
        )))
    }
}
