use anyhow::Result;
use clap::{Parser, Subcommand};
use coderag::commands::{
    ask_question, index_directory, list_models, run_doctor, search_code, show_status,
};
use coderag::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coderag")]
#[command(about = "Semantic code search and question answering over a local codebase")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure model providers and indexing
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Rebuild the index from the watched directory
    Index {
        /// Index this directory instead of the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Find the code most similar to a query
    Search {
        query: String,
        /// Number of results, defaults to the configured top_k
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Answer a question about the indexed code
    Ask { query: String },
    /// List models installed on the Ollama server
    Models,
    /// Show the state of the persisted index
    Status,
    /// Check that the embedding model, configuration and index agree
    Doctor {
        /// Store the detected dimension and remove a stale index
        #[arg(long)]
        fix: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Index { dir } => {
            index_directory(&Config::load()?, dir)?;
        }
        Commands::Search { query, top_k } => {
            search_code(&Config::load()?, &query, top_k)?;
        }
        Commands::Ask { query } => {
            ask_question(&Config::load()?, &query)?;
        }
        Commands::Models => {
            list_models(&Config::load()?)?;
        }
        Commands::Status => {
            show_status(&Config::load()?)?;
        }
        Commands::Doctor { fix } => {
            run_doctor(&Config::load()?, fix)?;
        }
    }

    Ok(())
}
