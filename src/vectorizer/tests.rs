use super::*;

struct LengthVectorizer;

impl Vectorizer for LengthVectorizer {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

struct EmptyVectorizer;

impl Vectorizer for EmptyVectorizer {
    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(Vec::new())
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
    };
    let client = OllamaVectorizer::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry.attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaVectorizer::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.timeout, Duration::from_secs(60));
    assert_eq!(client.retry.attempts, 5);
}

#[test]
fn invalid_config_is_rejected() {
    let config = OllamaConfig {
        batch_size: 0,
        ..OllamaConfig::default()
    };
    assert!(matches!(
        OllamaVectorizer::new(&config),
        Err(RagError::Config(_))
    ));
}

#[test]
fn endpoints_resolve_against_base_url() {
    let client = OllamaVectorizer::new(&OllamaConfig::default()).expect("client");
    assert_eq!(
        client.endpoint("api/embed").expect("url").as_str(),
        "http://localhost:11434/api/embed"
    );
}

#[test]
fn empty_input_needs_no_server() {
    // Unroutable port: any request would fail
    let config = OllamaConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        ..OllamaConfig::default()
    };
    let client = OllamaVectorizer::new(&config)
        .expect("client")
        .with_retry_attempts(1);

    let embeddings = client.embed(&[]).expect("empty input is a no-op");
    assert!(embeddings.is_empty());
}

#[test]
fn embed_one_uses_batch_embedding() {
    let embedding = LengthVectorizer.embed_one("abcd").expect("should embed");
    assert_eq!(embedding, vec![4.0, 1.0]);

    assert!(matches!(
        EmptyVectorizer.embed_one("abcd"),
        Err(RagError::Embedding(_))
    ));
}

#[test]
fn request_serialization() {
    let input = vec!["one".to_string(), "two".to_string()];
    let request = EmbedRequest {
        model: "nomic-embed-text:latest",
        input: &input,
    };
    let json = serde_json::to_value(&request).expect("should serialize");
    assert_eq!(json["model"], "nomic-embed-text:latest");
    assert_eq!(json["input"][1], "two");
}
