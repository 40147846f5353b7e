use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wiki_rag::Result;
use wiki_rag::commands::{
    ask_question, ingest_topic, keyword_search, run_pipeline, search, show_status,
};
use wiki_rag::config::{run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "wiki-rag")]
#[command(about = "Answer questions from Wikipedia articles stored in a vector database")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, instead of the platform default
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the vector store, Wikipedia and the language model
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest an article and answer a question from it
    Run {
        /// Wikipedia article to ingest, e.g. "Việt Nam"
        #[arg(long)]
        topic: Option<String>,
        /// Question to answer from the article
        #[arg(long)]
        question: Option<String>,
    },
    /// Rebuild the collection from a Wikipedia article
    Ingest {
        /// Wikipedia article to ingest
        topic: Option<String>,
    },
    /// Answer a question from the chunks already stored
    Ask {
        /// Question to answer
        question: Option<String>,
    },
    /// Hybrid search over stored chunks
    Search {
        /// Search text
        query: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Balance between keyword (0) and vector (1) ranking
        #[arg(long)]
        alpha: Option<f32>,
    },
    /// List stored chunks containing a substring
    Keyword {
        /// Substring to look for
        substring: String,
    },
    /// Show the state of every configured service
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(config_dir)?;
            } else {
                run_interactive_config(config_dir)?;
            }
        }
        Commands::Run { topic, question } => {
            run_pipeline(config_dir, topic.as_deref(), question.as_deref())?;
        }
        Commands::Ingest { topic } => {
            ingest_topic(config_dir, topic.as_deref())?;
        }
        Commands::Ask { question } => {
            ask_question(config_dir, question.as_deref())?;
        }
        Commands::Search {
            query,
            limit,
            alpha,
        } => {
            search(config_dir, &query, limit, alpha)?;
        }
        Commands::Keyword { substring } => {
            keyword_search(config_dir, &substring)?;
        }
        Commands::Status => {
            show_status(config_dir)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["wiki-rag", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn run_command_defaults() {
        let cli = Cli::try_parse_from(["wiki-rag", "run"]).expect("should parse");
        if let Commands::Run { topic, question } = cli.command {
            assert_eq!(topic, None);
            assert_eq!(question, None);
        } else {
            panic!("expected run command");
        }
    }

    #[test]
    fn run_command_with_topic_and_question() {
        let cli = Cli::try_parse_from([
            "wiki-rag",
            "run",
            "--topic",
            "Việt Nam",
            "--question",
            "Việt Nam có bao nhiêu người",
        ])
        .expect("should parse");

        if let Commands::Run { topic, question } = cli.command {
            assert_eq!(topic.as_deref(), Some("Việt Nam"));
            assert_eq!(question.as_deref(), Some("Việt Nam có bao nhiêu người"));
        } else {
            panic!("expected run command");
        }
    }

    #[test]
    fn search_command_options() {
        let cli = Cli::try_parse_from([
            "wiki-rag", "search", "dân số", "--limit", "5", "--alpha", "0.25",
        ])
        .expect("should parse");

        if let Commands::Search {
            query,
            limit,
            alpha,
        } = cli.command
        {
            assert_eq!(query, "dân số");
            assert_eq!(limit, Some(5));
            assert_eq!(alpha, Some(0.25));
        } else {
            panic!("expected search command");
        }
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from([
            "wiki-rag",
            "keyword",
            "Việt Nam",
            "--config-dir",
            "/tmp/rag",
        ])
        .expect("should parse");
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/rag")));
        assert!(matches!(cli.command, Commands::Keyword { substring } if substring == "Việt Nam"));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["wiki-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn search_requires_query() {
        let cli = Cli::try_parse_from(["wiki-rag", "search"]);
        assert!(matches!(cli, Err(err) if err.kind() == ErrorKind::MissingRequiredArgument));
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["wiki-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["wiki-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
