#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::PathBuf;

use super::{Config, ConfigError, OllamaConfig};
use crate::providers::ProviderKind;

const PROVIDER_CHOICES: &[&str] = &["ollama", "openai"];

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 CodeRAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Providers").bold().yellow());
    eprintln!("Embeddings and answers can come from different backends.");
    eprintln!();
    config.providers.embedding =
        select_provider("Embedding provider", &config.providers.embedding)?;
    config.providers.generation =
        select_provider("Generation provider", &config.providers.generation)?;


    if uses_provider(&config, ProviderKind::Ollama) {
        eprintln!();
        eprintln!("{}", style("Ollama Configuration").bold().yellow());
        configure_ollama(&mut config.ollama)?;
    }

    if uses_provider(&config, ProviderKind::OpenAi) {
        eprintln!();
        eprintln!("{}", style("OpenAI Configuration").bold().yellow());
        configure_openai(&mut config)?;
    }

    eprintln!();
    eprintln!("{}", style("Index Configuration").bold().yellow());
    configure_index(&mut config)?;

    if uses_provider(&config, ProviderKind::Ollama) {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_ollama_connection(&config.ollama) {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before indexing.");
        }
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
        eprintln!(
            "{}",
            style("If the embedding model changed, rebuild the index with `coderag index`.").dim()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Providers:").bold().yellow());
    eprintln!(
        "  Embeddings: {} ({})",
        style(&config.providers.embedding).cyan(),
        ProviderKind::from_selector(&config.providers.embedding)
    );
    eprintln!(
        "  Generation: {} ({})",
        style(&config.providers.generation).cyan(),
        ProviderKind::from_selector(&config.providers.generation)
    );
    eprintln!(
        "  Request timeout: {}s",
        style(config.providers.request_timeout_secs).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama.base_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Chat model: {}", style(&config.ollama.chat_model).cyan());
    eprintln!(
        "  Embedding model: {}",
        style(&config.ollama.embedding_model).cyan()
    );

    eprintln!();
    eprintln!("{}", style("OpenAI Settings:").bold().yellow());
    eprintln!("  URL: {}", style(&config.openai.base_url).cyan());
    eprintln!(
        "  API key: {}",
        if config.openai.api_key.is_some() {
            style("set").green()
        } else {
            style("not set").red()
        }
    );
    eprintln!("  Chat model: {}", style(&config.openai.chat_model).cyan());
    eprintln!(
        "  Embedding model: {}",
        style(&config.openai.embedding_model).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Index Settings:").bold().yellow());
    eprintln!(
        "  Watched directory: {}",
        style(config.index.watched_dir.display()).cyan()
    );
    eprintln!(
        "  Dimension hint: {}",
        style(config.index.embedding_dimension).cyan()
    );
    let ignored: Vec<String> = config
        .index
        .ignore_paths
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    eprintln!("  Ignored: {}", style(ignored.join(", ")).cyan());
    let paths = config.index_paths();
    eprintln!("  Vectors file: {}", style(paths.vectors.display()).dim());
    eprintln!("  Metadata file: {}", style(paths.metadata.display()).dim());

    eprintln!();
    eprintln!("{}", style("Retrieval & Generation:").bold().yellow());
    eprintln!("  Top-k: {}", style(config.retrieval.top_k).cyan());
    if let Some(floor) = config.retrieval.min_similarity {
        eprintln!("  Minimum similarity: {}", style(floor).cyan());
    }
    eprintln!(
        "  Temperature: {}",
        style(config.generation.temperature).cyan()
    );
    eprintln!("  Max tokens: {}", style(config.generation.max_tokens).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    let config_dir = Config::config_dir()?;
    Config::load_from(&config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config::with_base_dir(&config_dir))
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn select_provider(prompt: &str, current: &str) -> Result<String> {
    let index = Select::new()
        .with_prompt(prompt)
        .default(provider_index(current))
        .items(PROVIDER_CHOICES)
        .interact()?;
    Ok(PROVIDER_CHOICES[index].to_string())
}

/// Position of the selector in the choice list; unknown selectors resolve
/// the same way the provider factory does.
/// Whether either capability is served by `kind`
fn uses_provider(config: &Config, kind: ProviderKind) -> bool {
    ProviderKind::from_selector(&config.providers.embedding) == kind
        || ProviderKind::from_selector(&config.providers.generation) == kind
}

fn provider_index(selector: &str) -> usize {
    match ProviderKind::from_selector(selector) {
        ProviderKind::Ollama => 0,
        ProviderKind::OpenAi => 1,
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Ollama base URL")
        .default(ollama.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                base_url: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.embedding_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(ollama.chat_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    ollama.set_base_url(base_url)?;
    ollama.set_embedding_model(embedding_model)?;
    ollama.set_chat_model(chat_model)?;

    Ok(())
}

fn configure_openai(config: &mut Config) -> Result<()> {
    let openai = &mut config.openai;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(openai.embedding_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(openai.chat_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let api_key = Password::new()
        .with_prompt("API key (leave empty to keep the current one or use OPENAI_API_KEY)")
        .allow_empty_password(true)
        .interact()?;

    openai.embedding_model = embedding_model;
    openai.chat_model = chat_model;
    if !api_key.trim().is_empty() {
        openai.api_key = Some(api_key.trim().to_string());
    }

    Ok(())
}

fn configure_index(config: &mut Config) -> Result<()> {
    let watched_dir: String = Input::new()
        .with_prompt("Directory to index")
        .default(config.index.watched_dir.display().to_string())
        .validate_with(non_empty)
        .interact_text()?;

    let dimension: usize = Input::new()
        .with_prompt("Embedding dimension hint")
        .default(config.index.embedding_dimension)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=65536).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 1 and 65536")
            }
        })
        .interact_text()?;

    config.index.watched_dir = PathBuf::from(watched_dir);
    config.index.embedding_dimension = dimension;

    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Value cannot be empty")
    } else {
        Ok(())
    }
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let Ok(base_url) = ollama.base_url() else {
        return false;
    };
    let Ok(url) = base_url.join("/api/version") else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url.as_str()).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}
