use super::*;

const COLLECTION: &str = "VietnamCollection";

/// Counts words per concept: water, population, plus a constant bias
struct ConceptVectorizer;

impl ConceptVectorizer {
    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0, 0.0, 1.0];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            match word.as_str() {
                "river" | "delta" | "water" => vector[0] += 1.0,
                "people" | "population" | "inhabitants" | "census" => vector[1] += 1.0,
                _ => {}
            }
        }
        vector
    }
}

impl Vectorizer for ConceptVectorizer {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

struct FailingVectorizer;

impl Vectorizer for FailingVectorizer {
    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("vectorizer offline".to_string()))
    }
}

fn store_with(contents: &[&str]) -> MemoryStore {
    let mut store = MemoryStore::new(Box::new(ConceptVectorizer));
    store
        .create_collection(&CollectionSchema::for_chunks(COLLECTION, "text2vec-transformers"))
        .expect("should create collection");
    let records: Vec<ChunkRecord> = contents
        .iter()
        .enumerate()
        .map(|(i, content)| ChunkRecord::for_part("Doc", i + 1, *content))
        .collect();
    store
        .insert_batch(COLLECTION, &records)
        .expect("should insert records");
    store
}

fn titles(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|hit| hit.record.title.as_str()).collect()
}

#[test]
fn collection_lifecycle() {
    let mut store = MemoryStore::new(Box::new(ConceptVectorizer));
    let schema = CollectionSchema::for_chunks(COLLECTION, "text2vec-transformers");

    assert!(!store.collection_exists(COLLECTION).expect("exists"));
    store.create_collection(&schema).expect("should create");
    assert!(store.collection_exists(COLLECTION).expect("exists"));
    assert!(store.create_collection(&schema).is_err());

    store.delete_collection(COLLECTION).expect("should delete");
    assert!(!store.collection_exists(COLLECTION).expect("exists"));
    assert!(matches!(
        store.delete_collection(COLLECTION),
        Err(RagError::CollectionNotFound(_))
    ));
}

#[test]
fn missing_collection_is_reported() {
    let mut store = MemoryStore::new(Box::new(ConceptVectorizer));
    let record = ChunkRecord::for_part("Doc", 1, "text");

    assert!(matches!(
        store.insert("Nowhere", &record),
        Err(RagError::CollectionNotFound(_))
    ));
    assert!(matches!(
        store.hybrid_query("Nowhere", &HybridQuery::new("text")),
        Err(RagError::CollectionNotFound(_))
    ));
    assert!(matches!(
        store.count("Nowhere"),
        Err(RagError::CollectionNotFound(_))
    ));
}

#[test]
fn inserts_assign_distinct_ids() {
    let mut store = store_with(&["first"]);
    let id = store
        .insert(COLLECTION, &ChunkRecord::for_part("Doc", 2, "second"))
        .expect("should insert");

    let hits = store.keyword_query(COLLECTION, "", 10).expect("query");
    assert_eq!(hits.len(), 2);
    assert_ne!(hits[0].id, id);
    assert_eq!(hits[1].id, id);
    assert_eq!(store.count(COLLECTION).expect("count"), 2);
}

#[test]
fn failed_vectorization_stores_nothing() {
    let mut store = MemoryStore::new(Box::new(FailingVectorizer));
    store
        .create_collection(&CollectionSchema::for_chunks(COLLECTION, "none"))
        .expect("should create");

    let records = vec![ChunkRecord::for_part("Doc", 1, "text")];
    assert!(matches!(
        store.insert_batch(COLLECTION, &records),
        Err(RagError::Embedding(_))
    ));
    assert_eq!(store.count(COLLECTION).expect("count"), 0);
}

#[test]
fn pure_keyword_search_only_ranks_matching_records() {
    let store = store_with(&[
        "river river river people",
        "population inhabitants census",
        "people people market",
    ]);

    let hits = store
        .hybrid_query(COLLECTION, &HybridQuery::new("people").alpha(0.0).limit(10))
        .expect("query");

    assert_eq!(titles(&hits), vec!["Doc - Part 3", "Doc - Part 1"]);
    assert!(hits.iter().all(|hit| hit.score.is_some()));
}

#[test]
fn pure_vector_search_finds_related_records_without_shared_words() {
    let store = store_with(&["river river river people", "population inhabitants census"]);

    let keyword = store
        .hybrid_query(COLLECTION, &HybridQuery::new("people").alpha(0.0))
        .expect("keyword query");
    let vector = store
        .hybrid_query(COLLECTION, &HybridQuery::new("people").alpha(1.0))
        .expect("vector query");

    assert_eq!(titles(&keyword), vec!["Doc - Part 1"]);
    assert_eq!(titles(&vector), vec!["Doc - Part 2", "Doc - Part 1"]);
}

#[test]
fn hybrid_scores_are_descending_and_limited() {
    let store = store_with(&[
        "the delta water",
        "people of the river",
        "population census people",
        "market stalls",
    ]);

    let hits = store
        .hybrid_query(COLLECTION, &HybridQuery::new("people census"))
        .expect("query");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].record.title, "Doc - Part 3");
    let scores: Vec<f32> = hits.iter().filter_map(|hit| hit.score).collect();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(scores.iter().all(|score| (0.0..=1.0).contains(score)));
}

#[test]
fn equal_scores_keep_insertion_order() {
    let store = store_with(&["same words here", "same words here", "same words here"]);

    let hits = store
        .hybrid_query(COLLECTION, &HybridQuery::new("words").limit(3))
        .expect("query");

    assert_eq!(
        titles(&hits),
        vec!["Doc - Part 1", "Doc - Part 2", "Doc - Part 3"]
    );
}

#[test]
fn empty_collection_returns_no_hits() {
    let store = store_with(&[]);
    let hits = store
        .hybrid_query(COLLECTION, &HybridQuery::new("anything"))
        .expect("query");
    assert!(hits.is_empty());
}

#[test]
fn keyword_query_is_case_insensitive_substring_match() {
    let store = store_with(&[
        "Việt Nam có 100 triệu người",
        "Hà Nội là thủ đô",
        "dân số việt nam tăng",
        "Sông Mê Kông",
    ]);

    let hits = store
        .keyword_query(COLLECTION, "Việt Nam", 10)
        .expect("query");
    assert_eq!(titles(&hits), vec!["Doc - Part 1", "Doc - Part 3"]);
    assert!(hits.iter().all(|hit| hit.score.is_none()));

    let limited = store.keyword_query(COLLECTION, "n", 2).expect("query");
    assert_eq!(limited.len(), 2);
}

#[test]
fn closed_store_rejects_operations() {
    let mut store = store_with(&["text"]);
    assert!(store.is_ready().expect("ready"));

    store.close().expect("should close");
    assert!(!store.is_ready().expect("ready"));
    assert!(matches!(store.count(COLLECTION), Err(RagError::Store(_))));
    assert!(store.close().is_err());
}

#[test]
fn bm25_prefers_rarer_terms() {
    let objects: Vec<StoredObject> = ["common rare", "common", "common"]
        .iter()
        .map(|content| StoredObject {
            id: Uuid::new_v4(),
            record: ChunkRecord::for_part("Doc", 1, *content),
            vector: Vec::new(),
        })
        .collect();

    let scores = bm25_scores(&objects, "common rare", &["content".to_string()]);
    assert_eq!(scores.len(), 3);
    assert!(scores[&0] > scores[&1]);
    assert!((scores[&1] - scores[&2]).abs() < f32::EPSILON);
}

#[test]
fn bm25_follows_okapi_weighting() {
    let objects: Vec<StoredObject> = ["rare word", "word", "word word"]
        .iter()
        .map(|content| StoredObject {
            id: Uuid::new_v4(),
            record: ChunkRecord::for_part("Doc", 1, *content),
            vector: Vec::new(),
        })
        .collect();

    let scores = bm25_scores(&objects, "rare", &["content".to_string()]);

    // idf = ln(1 + 2.5 / 1.5), length ratio 2 / (5 / 3), k1 = 1.2, b = 0.75
    assert_eq!(scores.len(), 1);
    assert!((scores[&0] - 0.906_649).abs() < 1e-5);
}

#[test]
fn normalization_maps_into_unit_range() {
    let scores = HashMap::from([(0, 2.0), (1, 4.0), (2, 3.0)]);
    let normalized = normalize(&scores);
    assert!((normalized[&0] - 0.0).abs() < f32::EPSILON);
    assert!((normalized[&1] - 1.0).abs() < f32::EPSILON);
    assert!((normalized[&2] - 0.5).abs() < f32::EPSILON);

    let single = normalize(&HashMap::from([(7, 0.3)]));
    assert!((single[&7] - 1.0).abs() < f32::EPSILON);
}

#[test]
fn cosine_similarity_rejects_mismatched_dimensions() {
    assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_err());
    let same = cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]).expect("same dimension");
    assert!((same - 1.0).abs() < 1e-6);
    assert_eq!(
        cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).expect("zero"),
        0.0
    );
}
