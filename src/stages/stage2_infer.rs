use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, FingerprintCache, fingerprint};
use crate::llm::{
    BackendPool, InferenceError, SYSTEM_PROMPT, build_correction_prompt, build_parse_prompt,
    extract_json_array, parse_raw_records, repair_json, validate_records,
};
use crate::models::{ChatRecord, Chunk};

/// Configuration for Stage 2
#[derive(Debug, Clone)]
pub struct InferConfig {
    /// Correction round-trips after the first call produced unusable JSON
    pub max_corrections: u32,
    /// Retries per call on transient backend errors
    pub max_transient_retries: u32,
    /// Base delay between transient retries (scales linearly per attempt)
    pub retry_backoff: Duration,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            max_corrections: 1,
            max_transient_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Failure of one chunk's processing
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Outcome of processing one chunk
#[derive(Debug)]
pub struct ChunkOutcome {
    pub records: Arc<Vec<ChatRecord>>,
    pub from_cache: bool,
}

/// Execute Stage 2 for a single chunk: resolve it through the cache, or
/// run a validated inference and store the accepted result.
///
/// The claim guard makes the miss/infer/put sequence atomic per
/// fingerprint: a racing worker with identical chunk text waits here and
/// then hits the cache instead of re-invoking the backend.
pub async fn infer_chunk(
    backend: &BackendPool,
    cache: &FingerprintCache,
    chunk: &Chunk,
    config: &InferConfig,
) -> Result<ChunkOutcome, ChunkError> {
    let fingerprint = fingerprint(&chunk.text);
    let _claim = cache.claim(&fingerprint).await;

    if let Some(records) = cache.get(&fingerprint).await {
        debug!(
            "Chunk {}/{}: cache hit",
            chunk.conversation_id, chunk.sequence_index
        );
        return Ok(ChunkOutcome {
            records,
            from_cache: true,
        });
    }

    let records = infer_records(backend, &chunk.text, config).await?;
    let records = cache.put(&fingerprint, records).await?;

    Ok(ChunkOutcome {
        records,
        from_cache: false,
    })
}

/// The repair loop: an explicit bounded state machine, not open-ended
/// recursion.
///
/// Each round calls the backend once, then tries a strict parse and - only
/// if that fails - a textual repair followed by a re-parse. A failed round
/// triggers at most `max_corrections` correction round-trips with an
/// explicit "previous output was invalid" instruction. Exhaustion is a
/// terminal failure for the chunk; it is never replaced with an empty
/// result, because an empty array is a legitimate "no dialogue here"
/// answer and must stay distinguishable from breakage.
async fn infer_records(
    backend: &BackendPool,
    chunk_text: &str,
    config: &InferConfig,
) -> Result<Vec<ChatRecord>, InferenceError> {
    let mut attempts = 0;
    let mut last_detail = String::new();

    while attempts <= config.max_corrections {
        let user = if attempts == 0 {
            build_parse_prompt(chunk_text)
        } else {
            build_correction_prompt(chunk_text)
        };
        attempts += 1;

        let raw = call_with_retries(backend, SYSTEM_PROMPT, &user, config).await?;

        match parse_or_repair(&raw) {
            Ok(records) => return Ok(records),
            Err(detail) => {
                warn!("Parse attempt {} failed: {}", attempts, detail);
                last_detail = detail;
            }
        }
    }

    Err(InferenceError::InvalidOutput {
        attempts,
        detail: last_detail,
    })
}

/// Strict parse first; the repair path runs only when the strict parse
/// failed, so already-valid output is returned exactly as parsed.
fn parse_or_repair(raw: &str) -> Result<Vec<ChatRecord>, String> {
    let Some(snippet) = extract_json_array(raw) else {
        return Err("no JSON array in output".to_string());
    };

    match parse_raw_records(snippet) {
        Ok(records) => Ok(validate_records(records)),
        Err(parse_err) => {
            let repaired = repair_json(snippet);
            match parse_raw_records(&repaired) {
                Ok(records) => {
                    debug!("Accepted output after textual repair");
                    Ok(validate_records(records))
                }
                Err(repair_err) => Err(format!("{parse_err}; after repair: {repair_err}")),
            }
        }
    }
}

/// One backend call with bounded retries on transient errors
async fn call_with_retries(
    backend: &BackendPool,
    system: &str,
    user: &str,
    config: &InferConfig,
) -> Result<String, InferenceError> {
    let mut retries = 0;

    loop {
        match backend.parse_chunk(system, user).await {
            Ok(raw) => return Ok(raw),
            Err(e) if e.is_transient() && retries < config.max_transient_retries => {
                retries += 1;
                warn!(
                    "Transient backend error (retry {}/{}): {}",
                    retries, config.max_transient_retries, e
                );
                tokio::time::sleep(config.retry_backoff * retries).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::llm::InferenceBackend;
    use crate::models::Role;

    /// Backend that replays a fixed script of responses
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<String, InferenceError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<String, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn parse_chunk(&self, _system: &str, _user: &str) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::Backend {
                    status: 500,
                    body: "script exhausted".to_string(),
                }))
        }

        async fn probe(&self) -> Result<(), InferenceError> {
            Ok(())
        }
    }

    fn quick_config() -> InferConfig {
        InferConfig {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            conversation_id: "conv".to_string(),
            sequence_index: 0,
            text: text.to_string(),
            overlap_prefix_len: 0,
        }
    }

    const VALID: &str =
        r#"[{"time": null, "speaker": "Ravi", "role": "Agent", "message": "ok. since when?"}]"#;

    #[tokio::test]
    async fn test_valid_output_accepted_first_try() {
        let backend = ScriptedBackend::new(vec![Ok(VALID.to_string())]);
        let pool = BackendPool::new(backend.clone(), 1);

        let records = infer_records(&pool, "text", &quick_config()).await.unwrap();
        assert_eq!(backend.calls(), 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].speaker, "Ravi");
        assert_eq!(records[0].role, Role::Agent);
    }

    #[tokio::test]
    async fn test_malformed_output_repaired_without_second_call() {
        let broken = r#"[{"time": null, "speaker": "Ravi", "role": "Agent", "message": "ok",}]"#;
        let backend = ScriptedBackend::new(vec![Ok(broken.to_string())]);
        let pool = BackendPool::new(backend.clone(), 1);

        let records = infer_records(&pool, "text", &quick_config()).await.unwrap();
        assert_eq!(backend.calls(), 1);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_correction_round_trip_recovers() {
        let backend = ScriptedBackend::new(vec![
            Ok("sorry, I cannot".to_string()),
            Ok(VALID.to_string()),
        ]);
        let pool = BackendPool::new(backend.clone(), 1);

        let records = infer_records(&pool, "text", &quick_config()).await.unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal_not_empty() {
        let backend = ScriptedBackend::new(vec![
            Ok("still not json".to_string()),
            Ok("nope".to_string()),
        ]);
        let pool = BackendPool::new(backend.clone(), 1);

        let err = infer_records(&pool, "text", &quick_config()).await.unwrap_err();
        assert_eq!(backend.calls(), 2);
        assert!(matches!(err, InferenceError::InvalidOutput { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_empty_array_is_a_valid_answer() {
        let backend = ScriptedBackend::new(vec![Ok("[]".to_string())]);
        let pool = BackendPool::new(backend.clone(), 1);

        let records = infer_records(&pool, "text", &quick_config()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_retried_then_succeeds() {
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::Backend {
                status: 503,
                body: "busy".to_string(),
            }),
            Ok(VALID.to_string()),
        ]);
        let pool = BackendPool::new(backend.clone(), 1);

        let records = infer_records(&pool, "text", &quick_config()).await.unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let backend = ScriptedBackend::new(vec![Err(InferenceError::Backend {
            status: 400,
            body: "bad request".to_string(),
        })]);
        let pool = BackendPool::new(backend.clone(), 1);

        let err = infer_records(&pool, "text", &quick_config()).await.unwrap_err();
        assert_eq!(backend.calls(), 1);
        assert!(matches!(err, InferenceError::Backend { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_infer_chunk_caches_accepted_result() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::open(dir.path()).unwrap();
        let backend = ScriptedBackend::new(vec![Ok(VALID.to_string())]);
        let pool = BackendPool::new(backend.clone(), 1);
        let chunk = chunk("Ravi : ok. since when?");

        let first = infer_chunk(&pool, &cache, &chunk, &quick_config()).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(backend.calls(), 1);

        let second = infer_chunk(&pool, &cache, &chunk, &quick_config()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(backend.calls(), 1, "cache hit must not touch the backend");
        assert_eq!(first.records, second.records);
    }

    #[tokio::test]
    async fn test_failed_chunk_leaves_no_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::open(dir.path()).unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok("not json".to_string()),
            Ok("not json either".to_string()),
        ]);
        let pool = BackendPool::new(backend.clone(), 1);
        let chunk = chunk("some text");

        assert!(infer_chunk(&pool, &cache, &chunk, &quick_config()).await.is_err());
        assert_eq!(cache.entry_count().await, 0);
    }
}
