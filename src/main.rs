use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use confab::{
    BackendConfig, BackendKind, BackendPool, ChunkConfig, ConversionPipeline, FingerprintCache,
    InferConfig, MergeConfig, PipelineConfig, build_backend, chunk_text, discover_conversations,
    normalize, write_conversation_csv,
};

#[derive(Parser)]
#[command(name = "confab")]
#[command(author, version, about = "Chat transcript cleanup pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse raw transcripts into normalized chat records
    Process {
        /// Input file or directory (.csv, .txt, .pdf)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for per-conversation CSV artifacts
        #[arg(short, long)]
        output: PathBuf,

        /// Directory for the inference cache
        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,

        /// Inference backend: "ollama" or "llama-server"
        #[arg(long, default_value = "ollama")]
        backend: String,

        /// Model name understood by the backend
        #[arg(long, default_value = "mistral")]
        model: String,

        /// Backend base URL (defaults to the backend's conventional port)
        #[arg(long)]
        base_url: Option<String>,

        /// Minimum chunk size in bytes
        #[arg(long, default_value = "1200")]
        chunk_min: usize,

        /// Maximum chunk size in bytes
        #[arg(long, default_value = "1500")]
        chunk_max: usize,

        /// Overlap carried between consecutive chunks in bytes
        #[arg(long, default_value = "200")]
        overlap: usize,

        /// Concurrent conversation workers
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Concurrent in-flight model calls (raise only when the runtime
        /// actually serves multiple model instances)
        #[arg(long, default_value = "1")]
        model_slots: usize,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Inspect inputs without calling the model
    Analyze {
        /// Input file or directory (.csv, .txt, .pdf)
        #[arg(short, long)]
        input: PathBuf,

        /// Minimum chunk size in bytes
        #[arg(long, default_value = "1200")]
        chunk_min: usize,

        /// Maximum chunk size in bytes
        #[arg(long, default_value = "1500")]
        chunk_max: usize,

        /// Overlap carried between consecutive chunks in bytes
        #[arg(long, default_value = "200")]
        overlap: usize,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output,
            cache_dir,
            backend,
            model,
            base_url,
            chunk_min,
            chunk_max,
            overlap,
            workers,
            model_slots,
            verbose,
        } => {
            setup_logging(verbose);
            process_batch(
                input, output, cache_dir, backend, model, base_url, chunk_min, chunk_max, overlap,
                workers, model_slots,
            )
            .await
        }
        Commands::Analyze {
            input,
            chunk_min,
            chunk_max,
            overlap,
            verbose,
        } => {
            setup_logging(verbose);
            analyze_inputs(input, chunk_min, chunk_max, overlap)
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn process_batch(
    input: PathBuf,
    output: PathBuf,
    cache_dir: PathBuf,
    backend: String,
    model: String,
    base_url: Option<String>,
    chunk_min: usize,
    chunk_max: usize,
    overlap: usize,
    workers: usize,
    model_slots: usize,
) -> Result<()> {
    let kind = BackendKind::from_name(&backend)
        .with_context(|| format!("Unknown backend {backend:?} (expected ollama or llama-server)"))?;

    let items = discover_conversations(&input)?;
    if items.is_empty() {
        anyhow::bail!("No supported input files found in {input:?}");
    }
    info!("Found {} conversations to process", items.len());

    let base_url = base_url.unwrap_or_else(|| kind.default_base_url().to_string());
    let backend_config = BackendConfig::new(kind, base_url, model);
    let backend = build_backend(&backend_config);
    backend
        .probe()
        .await
        .context("Inference backend unavailable")?;

    let cache = Arc::new(FingerprintCache::open(&cache_dir).context("Failed to open cache")?);
    info!("Cache ready with {} entries", cache.entry_count().await);

    let config = PipelineConfig {
        chunking: ChunkConfig {
            min_size: chunk_min,
            max_size: chunk_max,
            overlap,
        },
        merging: MergeConfig::default(),
        inference: InferConfig::default(),
        workers,
    };

    let pipeline = Arc::new(ConversionPipeline::new(
        Arc::new(BackendPool::new(backend, model_slots)),
        cache,
        config,
    ));

    let summary = pipeline.run_batch(items).await;

    for result in &summary.succeeded {
        if result.is_empty() {
            warn!("No dialogue found in {}", result.conversation_id);
            continue;
        }
        let path = write_conversation_csv(result, &output)?;
        info!("Wrote {:?} ({} records)", path, result.len());
    }

    for (conversation_id, error) in &summary.failed {
        warn!("Failed {}: {}", conversation_id, error);
    }

    let (hits, misses) = pipeline.cache_stats();
    info!(
        "Complete: {} succeeded, {} failed, cache {} hits / {} misses",
        summary.succeeded.len(),
        summary.failed.len(),
        hits,
        misses
    );

    Ok(())
}

fn analyze_inputs(input: PathBuf, chunk_min: usize, chunk_max: usize, overlap: usize) -> Result<()> {
    let items = discover_conversations(&input)?;
    if items.is_empty() {
        anyhow::bail!("No supported input files found in {input:?}");
    }

    let config = ChunkConfig {
        min_size: chunk_min,
        max_size: chunk_max,
        overlap,
    };

    println!("Input Analysis");
    println!("==============");

    let mut total_chunks = 0;
    for (conversation_id, raw_text) in &items {
        let normalized = normalize(raw_text);
        let chunks = chunk_text(conversation_id, &normalized, &config);
        total_chunks += chunks.len();

        println!(
            "{}: {} raw bytes, {} normalized bytes, {} lines, {} chunks",
            conversation_id,
            raw_text.len(),
            normalized.len(),
            normalized.lines().count(),
            chunks.len()
        );
    }

    println!();
    println!("Conversations: {}", items.len());
    println!("Total chunks: {}", total_chunks);

    Ok(())
}
