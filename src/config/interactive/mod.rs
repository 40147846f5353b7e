
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;
use std::time::Duration;

use super::{Config, ConfigError, GenerationConfig, StoreBackend, StoreConfig, WeaviateConfig};
use crate::http::{self, RetryPolicy};

const CONNECTION_TEST_TIMEOUT_SECONDS: u64 = 5;

#[inline]
pub fn run_interactive_config(config_dir: Option<&Path>) -> Result<()> {
    eprintln!("{}", style("🔧 wiki-rag Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Vector Store").bold().yellow());
    eprintln!("Choose where chunk records are stored and searched.");
    eprintln!();

    configure_store(&mut config.store)?;
    if config.store.backend == StoreBackend::Weaviate {
        configure_weaviate(&mut config.weaviate)?;
    }

    eprintln!();
    eprintln!("{}", style("Wikipedia").bold().yellow());
    let language: String = Input::new()
        .with_prompt("Wikipedia language code")
        .default(config.wikipedia.language.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let mut candidate = config.wikipedia.clone();
            candidate.set_language(input.clone())
        })
        .interact_text()?;
    config.wikipedia.set_language(language)?;

    eprintln!();
    eprintln!("{}", style("Language Model").bold().yellow());
    eprintln!("Configure the OpenAI-compatible endpoint that answers questions.");
    eprintln!();
    configure_generation(&mut config.generation)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if config.store.backend == StoreBackend::Weaviate {
        if test_weaviate_connection(&config.weaviate) {
            eprintln!("{}", style("✓ Weaviate is ready!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not reach Weaviate").yellow()
            );
            eprintln!("You can continue, but make sure Weaviate is running before ingesting.");
        }
    }

    if test_generation_connection(&config.generation) {
        eprintln!("{}", style("✓ Language model endpoint reachable!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not reach the language model endpoint").yellow()
        );
        eprintln!("You can continue, but make sure the model server is running before asking.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: Option<&Path>) -> Result<()> {
    let config = Config::load_from(config_dir)
        .context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!("  Collection: {}", style(&config.store.collection).cyan());
    eprintln!("  Vectorizer: {}", style(&config.store.vectorizer).cyan());
    eprintln!(
        "  Insert Batch Size: {}",
        style(config.store.insert_batch_size).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Weaviate:").bold().yellow());
    match config.weaviate.base_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  gRPC Port: {}", style(config.weaviate.grpc_port).cyan());
    eprintln!(
        "  Timeouts: init {}s, query {}s, insert {}s",
        config.weaviate.timeouts.init,
        config.weaviate.timeouts.query,
        config.weaviate.timeouts.insert
    );

    if config.store.backend == StoreBackend::Memory {
        eprintln!();
        eprintln!("{}", style("Ollama (vectorizer):").bold().yellow());
        match config.ollama.ollama_url() {
            Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
            Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
        }
        eprintln!("  Model: {}", style(&config.ollama.model).cyan());
        eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    }

    eprintln!();
    eprintln!("{}", style("Wikipedia:").bold().yellow());
    eprintln!("  Language: {}", style(&config.wikipedia.language).cyan());
    eprintln!(
        "  User Agent: {}",
        style(&config.wikipedia.user_agent).cyan()
    );
    match config.wikipedia.api_url() {
        Ok(url) => eprintln!("  API: {}", style(url).cyan()),
        Err(e) => eprintln!("  API: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Language Model:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.generation.base_url).cyan());
    eprintln!("  Model: {}", style(&config.generation.model).cyan());
    let timeout = config.generation.timeout_seconds.map_or_else(
        || style("none".to_string()).dim(),
        |seconds| style(format!("{seconds}s")).cyan(),
    );
    eprintln!("  Timeout: {timeout}");

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Alpha: {}", style(config.retrieval.alpha).cyan());
    eprintln!("  Limit: {}", style(config.retrieval.limit).cyan());
    eprintln!(
        "  Keyword Limit: {}",
        style(config.retrieval.keyword_limit).cyan()
    );
    eprintln!(
        "  Chunking: {} chars, {} overlap",
        config.chunking.chunk_size, config.chunking.chunk_overlap
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: Option<&Path>) -> Result<Config> {
    Config::load_from(config_dir).or_else(|_| {
        eprintln!(
            "{}",
            style("Existing configuration could not be read. Using defaults.").yellow()
        );
        let base_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => Config::config_dir()?,
        };
        Ok(Config {
            base_dir,
            ..Config::default()
        })
    })
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let backends = &[StoreBackend::Weaviate, StoreBackend::Memory];
    let labels = &["weaviate (remote server)", "memory (in-process, vectorized by Ollama)"];
    let default_index = backends
        .iter()
        .position(|&b| b == store.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Store backend")
        .default(default_index)
        .items(labels)
        .interact()?;
    store.backend = backends.get(backend_index).copied().unwrap_or_default();

    let collection: String = Input::new()
        .with_prompt("Collection name")
        .default(store.collection.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let mut candidate = store.clone();
            candidate.set_collection(input.clone())
        })
        .interact_text()?;
    store.set_collection(collection)?;

    Ok(())
}

fn configure_weaviate(weaviate: &mut WeaviateConfig) -> Result<()> {
    let host: String = Input::new()
        .with_prompt("Weaviate host")
        .default(weaviate.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let mut candidate = weaviate.clone();
            candidate.set_host(input.clone())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Weaviate HTTP port")
        .default(weaviate.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let grpc_port: u16 = Input::new()
        .with_prompt("Weaviate gRPC port")
        .default(weaviate.grpc_port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    weaviate.set_host(host)?;
    weaviate.set_port(port)?;
    weaviate.set_grpc_port(grpc_port)?;

    Ok(())
}

fn configure_generation(generation: &mut GenerationConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(generation.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let mut candidate = generation.clone();
            candidate.set_base_url(input.clone())
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Model identifier")
        .default(generation.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    generation.set_base_url(base_url)?;
    generation.set_model(model)?;

    Ok(())
}

fn is_reachable(url: &str) -> bool {
    let agent = http::build_agent(
        None,
        Some(Duration::from_secs(CONNECTION_TEST_TIMEOUT_SECONDS)),
    );
    http::execute(url, RetryPolicy::none(), || {
        agent.get(url).call().and_then(http::read_response)
    })
    .is_ok_and(|response| response.status < 500)
}

fn test_weaviate_connection(weaviate: &WeaviateConfig) -> bool {
    weaviate
        .base_url()
        .ok()
        .and_then(|base| base.join("v1/.well-known/ready").ok())
        .is_some_and(|url| is_reachable(url.as_str()))
}

fn test_generation_connection(generation: &GenerationConfig) -> bool {
    generation
        .base_url()
        .is_ok_and(|base| {
            is_reachable(&format!("{}/models", base.as_str().trim_end_matches('/')))
        })
}
