use serde::{Deserialize, Serialize};

/// Configuration for chunk generation
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Minimum window size in bytes
    pub min_size: usize,
    /// Maximum window size in bytes
    pub max_size: usize,
    /// Trailing bytes of the previous window carried into the next one
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_size: 1200,
            max_size: 1500,
            overlap: 200,
        }
    }
}

/// A bounded contiguous slice of a normalized transcript, with possible
/// overlap with its predecessor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub conversation_id: String,
    /// 0-based position within the conversation, ordering-significant
    pub sequence_index: usize,
    /// Window text, including the overlap prefix
    pub text: String,
    /// Bytes of `text` shared with the previous chunk (0 for the first).
    /// `text[overlap_prefix_len..]` is this chunk's own contribution.
    pub overlap_prefix_len: usize,
}

impl Chunk {
    /// The non-overlapping suffix: concatenating these across the ordered
    /// chunk sequence reconstructs the normalized source exactly.
    pub fn own_text(&self) -> &str {
        &self.text[self.overlap_prefix_len..]
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
