// Configuration management: TOML settings file, validation and the
// interactive setup wizard

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, GenerationConfig, OllamaConfig, RetrievalConfig, StoreBackend,
    StoreConfig, TimeoutConfig, WeaviateConfig, WikipediaConfig,
};
