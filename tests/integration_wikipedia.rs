#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Wikipedia extract fetching against a mocked MediaWiki Action API

use serde_json::json;
use wiki_rag::RagError;
use wiki_rag::config::WikipediaConfig;
use wiki_rag::wikipedia::{DocumentSource, WikipediaClient};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn client_for(server: &MockServer) -> WikipediaClient {
    let config = WikipediaConfig {
        api_url: Some(format!("{}/w/api.php", server.uri())),
        user_agent: "wiki-rag-tests/0.1".to_string(),
        timeout_seconds: 5,
        ..WikipediaConfig::default()
    };
    WikipediaClient::new(&config).expect("valid config")
}

#[tokio::test(flavor = "multi_thread")]
async fn fetches_plain_text_extract() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("action", "query"))
        .and(query_param("prop", "extracts"))
        .and(query_param("explaintext", "1"))
        .and(query_param("redirects", "1"))
        .and(query_param("titles", "Việt Nam"))
        .and(header("user-agent", "wiki-rag-tests/0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "batchcomplete": true,
            "query": {
                "pages": [{
                    "pageid": 9662,
                    "ns": 0,
                    "title": "Việt Nam",
                    "extract": "Việt Nam là một quốc gia nằm ở cực Đông của bán đảo Đông Dương.\n\nDân số khoảng 100 triệu người."
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let document = tokio::task::spawn_blocking(move || client.fetch("  Việt Nam "))
        .await
        .expect("task should finish")
        .expect("fetch should succeed")
        .expect("article should exist");

    assert_eq!(document.title, "Việt Nam");
    assert_eq!(document.page_id, Some(9662));
    assert!(document.text.contains("Dân số khoảng 100 triệu người."));
}

#[tokio::test(flavor = "multi_thread")]
async fn redirects_resolve_to_target_title() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("titles", "Vietnam"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {
                "redirects": [{"from": "Vietnam", "to": "Việt Nam"}],
                "pages": [{"pageid": 9662, "ns": 0, "title": "Việt Nam", "extract": "Nội dung"}]
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let document = tokio::task::spawn_blocking(move || client.fetch("Vietnam"))
        .await
        .expect("task should finish")
        .expect("fetch should succeed")
        .expect("article should exist");

    assert_eq!(document.title, "Việt Nam");
    assert_eq!(document.text, "Nội dung");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_article_is_none() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{"ns": 0, "title": "Không tồn tại xyz", "missing": true}]}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let document = tokio::task::spawn_blocking(move || client.fetch("Không tồn tại xyz"))
        .await
        .expect("task should finish")
        .expect("fetch should succeed");

    assert!(document.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_fetch_errors() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = tokio::task::spawn_blocking(move || client.fetch("Việt Nam"))
        .await
        .expect("task should finish");

    assert!(matches!(result, Err(RagError::Fetch(message)) if message.contains("503")));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_is_a_network_error() {
    init_test_tracing();
    let config = WikipediaConfig {
        api_url: Some("http://127.0.0.1:9/w/api.php".to_string()),
        timeout_seconds: 2,
        ..WikipediaConfig::default()
    };
    let client = WikipediaClient::new(&config).expect("valid config");

    let result = tokio::task::spawn_blocking(move || client.fetch("Việt Nam"))
        .await
        .expect("task should finish");

    assert!(matches!(result, Err(RagError::Network(_))));
}
