use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, StoreBackend};
use crate::generation::ChatClient;
use crate::pipeline::{Answer, CollectionState, IngestReport, Pipeline, PipelineSettings};
use crate::store::{
    self, CONTENT_PROPERTY, HybridQuery, SearchHit, StoreSession, VectorStore, WeaviateStore,
};
use crate::vectorizer::OllamaVectorizer;
use crate::wikipedia::WikipediaClient;

/// Clients built from one configuration file
struct Services {
    config: Config,
    source: WikipediaClient,
    generator: ChatClient,
}

impl Services {
    fn load(config_dir: Option<&Path>) -> Result<Self> {
        let config = Config::load_from(config_dir)
            .context("Failed to load configuration")?;
        let source = WikipediaClient::new(&config.wikipedia)
            .context("Failed to create Wikipedia client")?;
        let generator = ChatClient::new(&config.generation)
            .context("Failed to create language model client")?;

        Ok(Self {
            config,
            source,
            generator,
        })
    }

    fn settings(&self) -> PipelineSettings {
        PipelineSettings::from_config(&self.config)
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Ingest `topic`, then answer `question` from the freshly stored chunks.
/// Either one falls back to the configured default.
#[inline]
pub fn run_pipeline(
    config_dir: Option<&Path>,
    topic: Option<&str>,
    question: Option<&str>,
) -> Result<()> {
    let services = Services::load(config_dir)?;
    let topic = topic.unwrap_or(&services.config.retrieval.default_topic);
    let question = question.unwrap_or(&services.config.retrieval.default_question);
    let store = store::build_store(&services.config)?;
    let settings = services.settings();

    info!("Running pipeline for topic {:?}", topic);
    let bar = spinner(&format!("Ingesting {topic} and asking the model"));
    let outcome = StoreSession::scope(store, |store| {
        Pipeline::new(store, &services.source, &services.generator, settings)?
            .run(topic, question)
    });
    bar.finish_and_clear();
    let outcome = outcome?;

    print_report(&outcome.report);
    println!();
    print_answer(&outcome.answer);
    Ok(())
}

/// Rebuild the collection from the article for `topic`
#[inline]
pub fn ingest_topic(config_dir: Option<&Path>, topic: Option<&str>) -> Result<()> {
    let services = Services::load(config_dir)?;
    let topic = topic.unwrap_or(&services.config.retrieval.default_topic);
    let store = store::build_store(&services.config)?;
    if services.config.store.backend == StoreBackend::Memory {
        warn!("The memory store keeps nothing once this command exits");
    }

    let bar = spinner(&format!("Ingesting {topic}"));
    let settings = services.settings();
    let report = StoreSession::scope(store, |store| {
        Pipeline::new(store, &services.source, &services.generator, settings)?
            .ingest(topic)
    });
    bar.finish_and_clear();

    print_report(&report?);
    Ok(())
}

/// Answer `question` from whatever the collection already holds
#[inline]
pub fn ask_question(config_dir: Option<&Path>, question: Option<&str>) -> Result<()> {
    let services = Services::load(config_dir)?;
    let question = question.unwrap_or(&services.config.retrieval.default_question);
    let store = store::build_store(&services.config)?;

    let bar = spinner("Asking the model");
    let settings = services.settings();
    let answer = StoreSession::scope(store, |store| {
        Pipeline::new(store, &services.source, &services.generator, settings)?
            .answer(question)
    });
    bar.finish_and_clear();

    print_answer(&answer?);
    Ok(())
}

/// Hybrid search over the stored chunks without generating an answer
#[inline]
pub fn search(
    config_dir: Option<&Path>,
    query: &str,
    limit: Option<usize>,
    alpha: Option<f32>,
) -> Result<()> {
    let config = Config::load_from(config_dir)
        .context("Failed to load configuration")?;
    let collection = config.store.collection.clone();
    let query = HybridQuery::new(query)
        .alpha(alpha.unwrap_or(config.retrieval.alpha))
        .limit(limit.unwrap_or(config.retrieval.limit))
        .properties(&[CONTENT_PROPERTY]);
    query.validate()?;

    let hits = StoreSession::scope(store::build_store(&config)?, |store| {
        store.hybrid_query(&collection, &query)
    })?;

    println!(
        "{}",
        style(format!("🔍 {} results for {:?}", hits.len(), query.query)).bold()
    );
    print_hits(&hits);
    Ok(())
}

/// Records whose content contains `substring`
#[inline]
pub fn keyword_search(config_dir: Option<&Path>, substring: &str) -> Result<()> {
    let config = Config::load_from(config_dir)
        .context("Failed to load configuration")?;
    let collection = config.store.collection.clone();
    let limit = config.retrieval.keyword_limit;

    let hits = StoreSession::scope(store::build_store(&config)?, |store| {
        store.keyword_query(&collection, substring, limit)
    })?;

    println!(
        "{}",
        style(format!("🔎 {} records contain {:?}", hits.len(), substring)).bold()
    );
    print_hits(&hits);
    Ok(())
}

/// Show what every configured service reports about itself
#[inline]
pub fn show_status(config_dir: Option<&Path>) -> Result<()> {
    let config = Config::load_from(config_dir).unwrap_or_else(|e| {
        warn!("Using default configuration: {:#}", e);
        Config::default()
    });

    println!("📊 wiki-rag Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Vector Store Status:");
    match config.store.backend {
        StoreBackend::Weaviate => match WeaviateStore::new(&config.weaviate) {
            Ok(weaviate) => {
                match weaviate.version() {
                    Ok(version) => println!(
                        "   ✅ Weaviate {}: {} (gRPC port {})",
                        version,
                        weaviate.base_url(),
                        weaviate.grpc_port()
                    ),
                    Err(e) => println!("   ❌ Weaviate: Failed to connect - {}", e),
                }
                print_collection_status(Box::new(weaviate), &config.store.collection);
            }
            Err(e) => println!("   ❌ Weaviate: Invalid configuration - {}", e),
        },
        StoreBackend::Memory => {
            println!("   💾 In-memory store (records last for a single command)");
            match OllamaVectorizer::new(&config.ollama) {
                Ok(vectorizer) => match vectorizer.health_check() {
                    Ok(()) => println!(
                        "   ✅ Ollama: Connected ({}:{}), model {}",
                        config.ollama.host, config.ollama.port, config.ollama.model
                    ),
                    Err(e) => println!("   ⚠️  Ollama: Connected but unhealthy - {}", e),
                },
                Err(e) => println!("   ❌ Ollama: Failed to connect - {}", e),
            }
        }
    }

    println!();
    println!("🤖 Language Model Status:");
    match ChatClient::new(&config.generation) {
        Ok(client) => match client.list_models() {
            Ok(models) => {
                println!("   ✅ Server: Connected ({})", client.base_url());
                let listed = models.iter().any(|m| m.id == config.generation.model);
                if listed {
                    println!("   📋 Model: {}", config.generation.model);
                } else {
                    println!(
                        "   ⚠️  Model {} not listed ({} models available)",
                        config.generation.model,
                        models.len()
                    );
                }
            }
            Err(e) => println!("   ❌ Server: Failed to connect - {}", e),
        },
        Err(e) => println!("   ❌ Server: Invalid configuration - {}", e),
    }

    println!();
    println!("📖 Wikipedia:");
    match WikipediaClient::new(&config.wikipedia) {
        Ok(client) => println!("   🌐 {} ({})", client.api_url(), client.language()),
        Err(e) => println!("   ❌ Invalid configuration - {}", e),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'wiki-rag config' to change these settings");
    println!("   • Use 'wiki-rag run' to ingest the default topic and ask the default question");
    Ok(())
}

fn print_collection_status(store: Box<dyn VectorStore>, collection: &str) {
    let result = StoreSession::scope(store, |store| {
        if store.collection_exists(collection)? {
            store.count(collection).map(Some)
        } else {
            Ok(None)
        }
    });

    match result {
        Ok(Some(count)) => println!("   📚 Collection {}: {} records", collection, count),
        Ok(None) => println!("   📭 Collection {} does not exist yet", collection),
        Err(e) => println!("   ⚠️  Collection {}: {}", collection, e),
    }
}

fn print_report(report: &IngestReport) {
    let action = match report.collection {
        CollectionState::Created => "created",
        CollectionState::Recreated => "recreated",
    };

    if report.found {
        let title = report.title.as_deref().unwrap_or(&report.topic);
        println!(
            "{} Stored {} chunks of {} (collection {})",
            style("✓").green(),
            report.chunks_stored,
            style(title).bold(),
            action
        );
    } else {
        println!(
            "{} No Wikipedia article found for {:?} (collection {}, empty)",
            style("⚠").yellow(),
            report.topic,
            action
        );
    }
}

fn print_answer(answer: &Answer) {
    let separator = "-".repeat(50);
    println!("{}", style("Prompt").bold().cyan());
    println!("{separator}");
    println!("{}", answer.prompt.text);
    println!("{separator}");
    println!();
    println!("{}", style("Answer").bold().green());
    println!("{}", answer.completion);
}

fn print_hits(hits: &[SearchHit]) {
    for (index, hit) in hits.iter().enumerate() {
        let score = hit
            .score
            .map(|score| format!(" (score {score:.3})"))
            .unwrap_or_default();
        println!(
            "{}. {}{}",
            index + 1,
            style(&hit.record.title).bold(),
            style(score).dim()
        );
        println!("   {}", hit.record.content.replace('\n', " "));
    }
}
