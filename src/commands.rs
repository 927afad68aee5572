use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::index::{IndexHeader, SharedIndex, VectorIndex};
use crate::providers::{
    EmbeddingSpace, OllamaClient, ProviderKind, build_embedder, build_generator, configured_space,
};
use crate::rag::{GenerationPolicy, RagOrchestrator, render_error};
use crate::retriever::Retriever;

/// Rebuild the index from the watched directory (or `dir`) and persist it
#[inline]
pub fn index_directory(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    let mut index_config = config.index.clone();
    if let Some(dir) = dir {
        index_config.watched_dir = dir;
    }
    let embedder = build_embedder(config)?;

    println!(
        "Indexing {} with {}",
        style(index_config.watched_dir.display()).cyan(),
        style(embedder.space()).cyan()
    );

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} files ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    let result = VectorIndex::build_from_config(&index_config, embedder.as_ref(), |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    });
    bar.finish_and_clear();

    let (index, stats) = match result {
        Ok(built) => built,
        Err(e) => {
            error!("Indexing failed: {}", e);
            return Err(e).context("Failed to build index");
        }
    };

    let paths = config.index_paths();
    index.persist(&paths).context("Failed to save index")?;

    println!("{}", style("✓ Index rebuilt").green());
    println!("  Files found: {}", stats.files_scanned);
    println!("  Files indexed: {}", stats.files_indexed);
    if stats.files_skipped > 0 {
        println!("  Files skipped: {}", style(stats.files_skipped).yellow());
    }
    if let Some(dimension) = index.dimension() {
        println!("  Dimension: {dimension}");
    }
    println!("  Saved to: {}", paths.vectors.display());
    Ok(())
}

/// Print the fragments most similar to `query`
#[inline]
pub fn search_code(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let retriever = open_retriever(config)?;
    let k = top_k.unwrap_or(config.retrieval.top_k);

    let hits = retriever
        .retrieve(query, k)
        .map_err(|e| anyhow::anyhow!(render_error(&e)))?;

    if hits.is_empty() {
        println!("No matching code found.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} (score {:.3})",
            rank + 1,
            style(&hit.fragment).cyan(),
            hit.score
        );
    }
    Ok(())
}

/// Answer `query` from the indexed code
#[inline]
pub fn ask_question(config: &Config, query: &str) -> Result<()> {
    let answer = match open_orchestrator(config) {
        Ok(rag) => rag.answer(query),
        Err(e) => {
            warn!("Cannot answer without an index: {}", e);
            render_error(&e)
        }
    };
    println!("{answer}");
    Ok(())
}

/// List the models installed on the local model server
#[inline]
pub fn list_models(config: &Config) -> Result<()> {
    let client = OllamaClient::new(config)?;
    let models = client
        .list_models()
        .context("Failed to list models from Ollama")?;

    if models.is_empty() {
        println!("No models installed on {}.", config.ollama.base_url);
        return Ok(());
    }

    println!("Models on {} ({} total):", config.ollama.base_url, models.len());
    for model in &models {
        let in_use = [&config.ollama.chat_model, &config.ollama.embedding_model]
            .iter()
            .any(|configured| is_same_model(&model.name, configured));
        let size = model
            .size
            .map(|bytes| format!("{:.1} GB", bytes as f64 / 1_000_000_000.0))
            .unwrap_or_default();
        if in_use {
            println!("  {} {} {}", style("*").green(), style(&model.name).bold(), size);
        } else {
            println!("    {} {}", model.name, size);
        }
    }
    Ok(())
}

/// Describe the persisted index and whether it can be used
#[inline]
pub fn show_status(config: &Config) -> Result<()> {
    let paths = config.index_paths();
    let space = configured_space(config);

    println!("{}", style("📊 CodeRAG Status").bold().cyan());
    println!();
    println!("Embeddings: {}", style(&space).cyan());
    println!(
        "Generation: {}",
        style(ProviderKind::from_selector(&config.providers.generation)).cyan()
    );
    println!("Index file: {}", paths.vectors.display());
    println!();

    if !paths.exist() {
        println!("{}", style("Index: not built yet").yellow());
        println!("  Run `coderag index` to build it.");
        return Ok(());
    }

    match VectorIndex::read_header(&paths) {
        Ok(header) => {
            println!("{}", style("Index:").bold().yellow());
            print_header(&header);
            match VectorIndex::load(&paths, &space, None) {
                Ok(_) => println!("  State: {}", style("ready").green()),
                Err(e) => println!("  State: {}", style(render_error(&e)).red()),
            }
        }
        Err(e) => {
            println!("{}", style("Index: not available").yellow());
            println!("  {}", render_error(&e));
        }
    }
    Ok(())
}

/// Probe the embedder for its real dimension and compare it with the
/// configuration and the persisted index. With `fix`, record the detected
/// dimension and delete an index that can no longer be searched.
#[inline]
pub fn run_doctor(config: &Config, fix: bool) -> Result<()> {
    println!("{}", style("🩺 CodeRAG Doctor").bold().cyan());
    println!();

    let embedder = build_embedder(config)?;
    let space = embedder.space();
    println!("Probing {}...", style(&space).cyan());
    let detected = embedder
        .embed("dimension probe")
        .map_err(|e| anyhow::anyhow!(render_error(&e)))?
        .len();

    let paths = config.index_paths();
    let header = VectorIndex::read_header(&paths).ok();
    let report = diagnose(
        config.index.embedding_dimension,
        detected,
        &space,
        header.as_ref(),
    );

    println!("  Detected dimension: {}", style(detected).cyan());
    if report.hint_matches {
        println!("  {} configured dimension matches", style("✓").green());
    } else {
        println!(
            "  {} configured dimension is {}",
            style("⚠").yellow(),
            config.index.embedding_dimension
        );
    }
    match &report.index {
        IndexVerdict::Missing => println!("  {} no index built yet", style("-").dim()),
        IndexVerdict::Compatible => println!("  {} index is compatible", style("✓").green()),
        IndexVerdict::Stale(reason) => {
            println!("  {} index is stale: {}", style("⚠").yellow(), reason);
        }
    }

    if report.is_healthy() {
        println!();
        println!("{}", style("Everything looks fine.").green());
        return Ok(());
    }

    if !fix {
        println!();
        println!(
            "Run `coderag doctor --fix` to repair, then `coderag index` if the index was removed."
        );
        return Ok(());
    }

    if !report.hint_matches {
        // Save from the file alone so environment overrides stay out of it
        let mut stored = Config::load_from(config.get_base_dir())?;
        stored.index.embedding_dimension = detected;
        stored.save()?;
        info!("Stored embedding dimension {}", detected);
        println!("{} saved dimension {}", style("✓").green(), detected);
    }
    if matches!(report.index, IndexVerdict::Stale(_)) {
        paths.remove().context("Failed to remove stale index")?;
        println!(
            "{} removed stale index, rebuild it with `coderag index`",
            style("✓").green()
        );
    }
    Ok(())
}

fn open_retriever(config: &Config) -> crate::Result<Retriever> {
    let embedder = build_embedder(config)?;
    let index = VectorIndex::load(&config.index_paths(), &embedder.space(), None)?;
    info!("Loaded index with {} entries", index.len());
    Ok(Retriever::from_config(
        embedder,
        Arc::new(SharedIndex::new(index)),
        &config.retrieval,
    ))
}

fn open_orchestrator(config: &Config) -> crate::Result<RagOrchestrator> {
    let retriever = open_retriever(config)?;
    let generator = build_generator(config)?;
    Ok(RagOrchestrator::new(retriever, generator)
        .with_policy(GenerationPolicy::from_config(config)))
}

fn print_header(header: &IndexHeader) {
    println!("  Built with: {}", style(&header.space).cyan());
    println!(
        "  Dimension: {}",
        header
            .dimension
            .map_or_else(|| "-".to_string(), |dimension| dimension.to_string())
    );
    println!("  Entries: {}", header.entry_count);
    println!(
        "  Built at: {}",
        header.built_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(dir) = &header.watched_dir {
        println!("  Source: {}", dir.display());
    }
}

fn is_same_model(installed: &str, configured: &str) -> bool {
    installed == configured || installed.strip_suffix(":latest") == Some(configured)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexVerdict {
    Missing,
    Compatible,
    Stale(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DoctorReport {
    hint_matches: bool,
    index: IndexVerdict,
}

impl DoctorReport {
    fn is_healthy(&self) -> bool {
        self.hint_matches && !matches!(self.index, IndexVerdict::Stale(_))
    }
}

fn diagnose(
    configured: usize,
    detected: usize,
    space: &EmbeddingSpace,
    header: Option<&IndexHeader>,
) -> DoctorReport {
    let index = match header {
        None => IndexVerdict::Missing,
        Some(header) if header.space != *space => {
            IndexVerdict::Stale(format!("built with {}", header.space))
        }
        Some(header) => match header.dimension {
            Some(stored) if stored != detected => {
                IndexVerdict::Stale(format!("holds {stored}-dimensional vectors"))
            }
            _ => IndexVerdict::Compatible,
        },
    };
    DoctorReport {
        hint_matches: configured == detected,
        index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn space(model: &str) -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::Ollama,
            model: model.to_string(),
        }
    }

    fn header(model: &str, dimension: usize) -> IndexHeader {
        IndexHeader {
            format_version: 2,
            space: space(model),
            dimension: Some(dimension),
            entry_count: 3,
            built_at: Utc::now(),
            build_id: 1,
            watched_dir: None,
        }
    }

    #[test]
    fn healthy_when_everything_agrees() {
        let report = diagnose(768, 768, &space("nomic"), Some(&header("nomic", 768)));
        assert_eq!(report.index, IndexVerdict::Compatible);
        assert!(report.is_healthy());
    }

    #[test]
    fn wrong_hint_is_unhealthy_without_index() {
        let report = diagnose(1536, 768, &space("nomic"), None);
        assert_eq!(report.index, IndexVerdict::Missing);
        assert!(!report.hint_matches);
        assert!(!report.is_healthy());
    }

    #[test]
    fn index_from_other_model_is_stale() {
        let report = diagnose(768, 768, &space("nomic"), Some(&header("llama2", 768)));
        assert!(matches!(
            &report.index,
            IndexVerdict::Stale(reason) if reason.contains("ollama/llama2")
        ));
    }

    #[test]
    fn index_with_other_dimension_is_stale() {
        let report = diagnose(4096, 4096, &space("nomic"), Some(&header("nomic", 768)));
        assert!(matches!(&report.index, IndexVerdict::Stale(reason) if reason.contains("768")));
        assert!(!report.is_healthy());
    }

    #[test]
    fn latest_tag_matches_untagged_name() {
        assert!(is_same_model("llama2:latest", "llama2"));
        assert!(is_same_model("llama2:7b", "llama2:7b"));
        assert!(!is_same_model("llama2:7b", "llama2"));
    }
}
