use super::*;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

/// Store stub that counts `close` calls and can refuse inserts
struct CountingStore {
    ready: bool,
    closes: Rc<Cell<usize>>,
    inserted: Vec<ChunkRecord>,
    fail_after: Option<usize>,
}

impl CountingStore {
    fn new(closes: &Rc<Cell<usize>>) -> Self {
        Self {
            ready: true,
            closes: Rc::clone(closes),
            inserted: Vec::new(),
            fail_after: None,
        }
    }
}

impl VectorStore for CountingStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    fn is_ready(&self) -> Result<bool> {
        Ok(self.ready)
    }

    fn collection_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    fn create_collection(&mut self, _schema: &CollectionSchema) -> Result<()> {
        Ok(())
    }

    fn delete_collection(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn insert(&mut self, _collection: &str, record: &ChunkRecord) -> Result<Uuid> {
        if self.fail_after.is_some_and(|limit| self.inserted.len() >= limit) {
            return Err(RagError::Store("insert rejected".to_string()));
        }
        self.inserted.push(record.clone());
        Ok(Uuid::new_v4())
    }

    fn hybrid_query(&self, _collection: &str, _query: &HybridQuery) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    fn keyword_query(
        &self,
        _collection: &str,
        _substring: &str,
        _limit: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    fn count(&self, _collection: &str) -> Result<usize> {
        Ok(self.inserted.len())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

#[test]
fn chunk_record_titles_are_one_indexed() {
    let record = ChunkRecord::for_part("Việt Nam", 1, "Paragraph one text.");
    assert_eq!(record.title, "Việt Nam - Part 1");
    assert_eq!(
        record.property(CONTENT_PROPERTY),
        Some("Paragraph one text.")
    );
    assert_eq!(record.property(TITLE_PROPERTY), Some("Việt Nam - Part 1"));
    assert_eq!(record.property("summary"), None);
}

#[test]
fn chunk_schema_vectorizes_both_properties() {
    let schema = CollectionSchema::for_chunks("VietnamCollection", "text2vec-transformers");
    assert_eq!(schema.properties.len(), 2);
    assert!(
        schema
            .properties
            .iter()
            .all(|p| p.tokenization == Tokenization::Lowercase && p.vectorize_property_name)
    );
    assert_eq!(
        schema.vectorized_properties().collect::<Vec<_>>(),
        vec![TITLE_PROPERTY, CONTENT_PROPERTY]
    );
}

#[test]
fn hybrid_query_defaults_and_validation() {
    let query = HybridQuery::new("Việt Nam có bao nhiêu người");
    assert!((query.alpha - 0.5).abs() < f32::EPSILON);
    assert_eq!(query.limit, 3);
    assert_eq!(query.properties, vec![CONTENT_PROPERTY.to_string()]);
    assert!(query.validate().is_ok());

    assert!(HybridQuery::new(" ").validate().is_err());
    assert!(HybridQuery::new("q").alpha(1.5).validate().is_err());
    assert!(HybridQuery::new("q").limit(0).validate().is_err());
    assert!(HybridQuery::new("q").properties(&[]).validate().is_err());
    assert!(HybridQuery::new("q").alpha(0.0).validate().is_ok());
    assert!(HybridQuery::new("q").alpha(1.0).validate().is_ok());
}

#[test]
fn default_batch_insert_stops_at_first_failure() {
    let closes = Rc::new(Cell::new(0));
    let mut store = CountingStore::new(&closes);
    store.fail_after = Some(2);

    let records: Vec<ChunkRecord> = (1..=4)
        .map(|part| ChunkRecord::for_part("Topic", part, format!("chunk {part}")))
        .collect();

    assert!(store.insert_batch("Topic", &records).is_err());
    assert_eq!(store.inserted.len(), 2);
    assert_eq!(store.inserted[1].title, "Topic - Part 2");
}

#[test]
fn session_closes_once_on_explicit_close() {
    let closes = Rc::new(Cell::new(0));
    let session = StoreSession::open(Box::new(CountingStore::new(&closes))).expect("should open");
    session.close().expect("should close");
    assert_eq!(closes.get(), 1);
}

#[test]
fn session_closes_once_on_drop() {
    let closes = Rc::new(Cell::new(0));
    {
        let mut session =
            StoreSession::open(Box::new(CountingStore::new(&closes))).expect("should open");
        session
            .store_mut()
            .insert("Topic", &ChunkRecord::for_part("Topic", 1, "text"))
            .expect("should insert");
        assert_eq!(session.store().count("Topic").expect("count"), 1);
    }
    assert_eq!(closes.get(), 1);
}

#[test]
fn scope_closes_once_when_closure_fails() {
    let closes = Rc::new(Cell::new(0));
    let result: Result<()> = StoreSession::scope(Box::new(CountingStore::new(&closes)), |_| {
        Err(RagError::Generation("model endpoint unavailable".to_string()))
    });

    assert!(matches!(result, Err(RagError::Generation(_))));
    assert_eq!(closes.get(), 1);
}

#[test]
fn scope_closes_once_when_closure_panics() {
    let closes = Rc::new(Cell::new(0));
    let store = Box::new(CountingStore::new(&closes));

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _: Result<()> = StoreSession::scope(store, |_| panic!("boom"));
    }));

    assert!(outcome.is_err());
    assert_eq!(closes.get(), 1);
}

#[test]
fn unready_store_is_closed_and_rejected() {
    let closes = Rc::new(Cell::new(0));
    let mut store = CountingStore::new(&closes);
    store.ready = false;

    let result = StoreSession::open(Box::new(store));
    assert!(matches!(result, Err(RagError::Store(_))));
    assert_eq!(closes.get(), 1);
}
