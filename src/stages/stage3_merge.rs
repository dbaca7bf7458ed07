use std::collections::HashSet;

use crate::models::{ChatRecord, Chunk, ConversationResult};

/// Configuration for overlap resolution
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Jaccard similarity on message tokens above which two records with
    /// the same speaker count as the same turn
    pub similarity_threshold: f64,
    /// How many trailing records of the accumulated output a chunk's
    /// leading records are compared against
    pub tail_window: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            tail_window: 8,
        }
    }
}

/// Stitch per-chunk record sequences into one ordered, duplicate-free
/// conversation record.
///
/// Consecutive chunks share source text, so both inferences may contain
/// records derived from the shared region. For every chunk after the
/// first, leading records that duplicate the tail of the accumulated
/// output are dropped; the earlier chunk's version is authoritative since
/// it saw the full context of what preceded it. Records that only the
/// later chunk produced are kept, so differing overlap inferences merge
/// union-like instead of losing turns.
///
/// Parts are reordered by `sequence_index` first, making the result
/// independent of the order in which chunks finished.
pub fn merge(
    conversation_id: &str,
    mut parts: Vec<(Chunk, Vec<ChatRecord>)>,
    config: &MergeConfig,
) -> ConversationResult {
    parts.sort_by_key(|(chunk, _)| chunk.sequence_index);

    let mut merged: Vec<ChatRecord> = Vec::new();

    for (index, (_, records)) in parts.into_iter().enumerate() {
        let mut records = records.as_slice();

        if index > 0 {
            let tail_start = merged.len().saturating_sub(config.tail_window);
            let skip = leading_duplicates(records, &merged[tail_start..], config);
            records = &records[skip..];
        }

        merged.extend_from_slice(records);
    }

    ConversationResult {
        conversation_id: conversation_id.to_string(),
        records: merged,
    }
}

/// Number of leading records already represented in the previous chunk's
/// accepted tail
fn leading_duplicates(records: &[ChatRecord], tail: &[ChatRecord], config: &MergeConfig) -> usize {
    let mut skip = 0;
    for record in records {
        if tail.iter().any(|prev| is_duplicate(prev, record, config)) {
            skip += 1;
        } else {
            break;
        }
    }
    skip
}

fn is_duplicate(earlier: &ChatRecord, later: &ChatRecord, config: &MergeConfig) -> bool {
    if earlier == later {
        return true;
    }
    earlier.speaker.eq_ignore_ascii_case(&later.speaker)
        && jaccard_similarity(&earlier.message, &later.message) >= config.similarity_threshold
}

/// Jaccard similarity between two texts (tokenized by whitespace)
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let tokens_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn record(speaker: &str, message: &str) -> ChatRecord {
        ChatRecord::new(None, speaker, Role::User, message)
    }

    fn part(index: usize, overlap: usize, records: Vec<ChatRecord>) -> (Chunk, Vec<ChatRecord>) {
        (
            Chunk {
                conversation_id: "conv".to_string(),
                sequence_index: index,
                text: String::new(),
                overlap_prefix_len: overlap,
            },
            records,
        )
    }

    #[test]
    fn test_empty_parts_empty_result() {
        let result = merge("conv", vec![], &MergeConfig::default());
        assert!(result.is_empty());
    }

    #[test]
    fn test_exact_boundary_duplicate_kept_once() {
        let shared = record("Neha", "today only.");
        let parts = vec![
            part(0, 0, vec![record("Ravi", "ok. since when?"), shared.clone()]),
            part(1, 20, vec![shared.clone(), record("Ravi", "press f8 whn restart.")]),
        ];

        let result = merge("conv", parts, &MergeConfig::default());
        assert_eq!(result.records.len(), 3);
        assert_eq!(
            result.records.iter().filter(|r| **r == shared).count(),
            1
        );
    }

    #[test]
    fn test_near_duplicate_drops_later_version() {
        let parts = vec![
            part(0, 0, vec![record("Neha", "i restarted the laptop today morning")]),
            part(
                1,
                20,
                vec![
                    record("Neha", "restarted the laptop today morning"),
                    record("Ravi", "ok good"),
                ],
            ),
        ];

        let result = merge("conv", parts, &MergeConfig::default());
        assert_eq!(result.records.len(), 2);
        // the earlier chunk's version is the one that survives
        assert_eq!(result.records[0].message, "i restarted the laptop today morning");
    }

    #[test]
    fn test_same_text_different_speaker_is_not_a_duplicate() {
        let parts = vec![
            part(0, 0, vec![record("Ravi", "ok")]),
            part(1, 5, vec![record("Neha", "ok"), record("Ravi", "bye")]),
        ];

        let result = merge("conv", parts, &MergeConfig::default());
        assert_eq!(result.records.len(), 3);
    }

    #[test]
    fn test_union_keeps_records_only_the_later_chunk_saw() {
        let shared = record("Ravi", "press f8 whn restart. tell me what happen");
        let parts = vec![
            part(0, 0, vec![record("Ravi", "ok. since when?"), shared.clone()]),
            part(
                1,
                30,
                vec![shared.clone(), record("User", "safe mode opened. (yay)")],
            ),
        ];

        let result = merge("conv", parts, &MergeConfig::default());
        let messages: Vec<&str> = result.records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "ok. since when?",
                "press f8 whn restart. tell me what happen",
                "safe mode opened. (yay)",
            ]
        );
    }

    #[test]
    fn test_result_independent_of_part_order() {
        let parts_ordered = vec![
            part(0, 0, vec![record("A", "one")]),
            part(1, 0, vec![record("B", "two")]),
            part(2, 0, vec![record("C", "three")]),
        ];
        let mut parts_shuffled = vec![
            part(2, 0, vec![record("C", "three")]),
            part(0, 0, vec![record("A", "one")]),
            part(1, 0, vec![record("B", "two")]),
        ];
        parts_shuffled.rotate_left(1);

        let a = merge("conv", parts_ordered, &MergeConfig::default());
        let b = merge("conv", parts_shuffled, &MergeConfig::default());
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("", ""), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        let sim = jaccard_similarity("a b c d", "a b c");
        assert!(sim > 0.7 && sim < 0.8);
    }
}
