use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::FingerprintCache;
use crate::llm::BackendPool;
use crate::models::{ChunkConfig, ConversationResult};
use crate::stages::{ChunkError, InferConfig, MergeConfig, chunk_text, infer_chunk, merge, normalize};

/// Configuration for the conversion pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub chunking: ChunkConfig,
    pub merging: MergeConfig,
    pub inference: InferConfig,
    /// Concurrent conversations in flight
    pub workers: usize,
}

impl PipelineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Failure of one conversation's processing. Sibling conversations in the
/// same batch are unaffected.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("conversation {conversation_id}, chunk {chunk_index}: {source}")]
    Chunk {
        conversation_id: String,
        chunk_index: usize,
        #[source]
        source: ChunkError,
    },

    #[error("conversation {conversation_id}: worker task failed: {detail}")]
    Task {
        conversation_id: String,
        detail: String,
    },
}

/// End-of-run report: which conversations succeeded, which failed and why
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<ConversationResult>,
    pub failed: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Orchestrates normalize -> chunk -> cached inference -> merge for each
/// conversation, with the backend pool as the only serialization point.
pub struct ConversionPipeline {
    backend: Arc<BackendPool>,
    cache: Arc<FingerprintCache>,
    config: PipelineConfig,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

impl ConversionPipeline {
    pub fn new(
        backend: Arc<BackendPool>,
        cache: Arc<FingerprintCache>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            config,
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
        }
    }

    /// Process one conversation end to end.
    ///
    /// Chunks run concurrently; results are reassembled by sequence index,
    /// so record order is deterministic regardless of completion order.
    /// The first terminal chunk failure aborts the remaining chunks and
    /// fails the conversation.
    pub async fn process_conversation(
        &self,
        conversation_id: &str,
        raw_text: &str,
    ) -> Result<ConversationResult, PipelineError> {
        let normalized = normalize(raw_text);
        let chunks = chunk_text(conversation_id, &normalized, &self.config.chunking);

        debug!(
            "Conversation {}: {} bytes normalized, {} chunks",
            conversation_id,
            normalized.len(),
            chunks.len()
        );

        if chunks.is_empty() {
            return Ok(ConversationResult {
                conversation_id: conversation_id.to_string(),
                records: vec![],
            });
        }

        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let backend = self.backend.clone();
            let cache = self.cache.clone();
            let infer_config = self.config.inference.clone();
            tasks.spawn(async move {
                let outcome = infer_chunk(&backend, &cache, &chunk, &infer_config).await;
                (chunk, outcome)
            });
        }

        let mut parts = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (chunk, outcome) = joined.map_err(|e| PipelineError::Task {
                conversation_id: conversation_id.to_string(),
                detail: e.to_string(),
            })?;

            match outcome {
                Ok(outcome) => {
                    if outcome.from_cache {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.cache_misses.fetch_add(1, Ordering::Relaxed);
                    }
                    parts.push((chunk, outcome.records.to_vec()));
                }
                Err(source) => {
                    // Dropping the set aborts the chunks still in flight
                    return Err(PipelineError::Chunk {
                        conversation_id: conversation_id.to_string(),
                        chunk_index: chunk.sequence_index,
                        source,
                    });
                }
            }
        }

        Ok(merge(conversation_id, parts, &self.config.merging))
    }

    /// Process a batch of conversations on a bounded worker pool. One
    /// conversation's failure is recorded and does not disturb the rest.
    pub async fn run_batch(self: &Arc<Self>, items: Vec<(String, String)>) -> BatchSummary {
        let workers = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for (conversation_id, raw_text) in items {
            let pipeline = self.clone();
            let workers = workers.clone();
            tasks.spawn(async move {
                let _permit = workers.acquire_owned().await.expect("semaphore closed");
                let result = pipeline
                    .process_conversation(&conversation_id, &raw_text)
                    .await;
                (conversation_id, result)
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(result))) => {
                    info!("Processed {}: {} records", id, result.len());
                    summary.succeeded.push(result);
                }
                Ok((id, Err(e))) => {
                    warn!("Failed {}: {}", id, e);
                    summary.failed.push((id, e.to_string()));
                }
                Err(e) => {
                    warn!("Worker task panicked: {}", e);
                    summary.failed.push(("<unknown>".to_string(), e.to_string()));
                }
            }
        }

        summary
            .succeeded
            .sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        summary.failed.sort();

        summary
    }

    /// (hits, misses) across everything processed so far
    pub fn cache_stats(&self) -> (usize, usize) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }
}
