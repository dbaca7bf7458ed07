pub mod cache;
pub mod io;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod stages;

pub use cache::{CacheError, FingerprintCache, fingerprint};
pub use io::{discover_conversations, write_conversation_csv};
pub use llm::{
    BackendConfig, BackendKind, BackendPool, InferenceBackend, InferenceError, LlamaServerClient,
    OllamaClient, build_backend,
};
pub use models::{ChatRecord, Chunk, ChunkConfig, ConversationResult, Role};
pub use pipeline::{BatchSummary, ConversionPipeline, PipelineConfig, PipelineError};
pub use stages::{ChunkError, InferConfig, MergeConfig, chunk_text, infer_chunk, merge, normalize};
