use crate::models::{Chunk, ChunkConfig};

/// Split normalized text into overlapping bounded-size windows.
///
/// Windows end at a line boundary where one exists inside
/// `[min_size, max_size]`, then a sentence boundary, then a word boundary,
/// and only hard-cut as a last resort. Every window after the first starts
/// with the trailing `overlap` bytes of its predecessor so the model sees
/// cross-chunk context; `overlap_prefix_len` records the carried prefix so
/// the merger can resolve the duplicated region later.
///
/// Invariant: concatenating `own_text()` over the returned sequence
/// reproduces `text` exactly.
pub fn chunk_text(conversation_id: &str, text: &str, config: &ChunkConfig) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let ranges = split_core_ranges(text, config);

    let mut chunks = Vec::with_capacity(ranges.len());
    for (index, range) in ranges.iter().enumerate() {
        let core = &text[range.clone()];
        let (chunk_text, overlap_prefix_len) = if index == 0 {
            (core.to_string(), 0)
        } else {
            let prefix = overlap_prefix(&text[..range.start], config.overlap);
            (format!("{prefix}{core}"), prefix.len())
        };

        chunks.push(Chunk {
            conversation_id: conversation_id.to_string(),
            sequence_index: index,
            text: chunk_text,
            overlap_prefix_len,
        });
    }

    chunks
}

/// Contiguous non-overlapping byte ranges covering the whole text
fn split_core_ranges(text: &str, config: &ChunkConfig) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;

    while start < text.len() {
        if text.len() - start <= config.max_size {
            ranges.push(start..text.len());
            break;
        }

        let end = pick_break(text, start, config);
        ranges.push(start..end);
        start = end;
    }

    ranges
}

/// Choose a window end in `(start+min_size, start+max_size]`, preferring
/// natural boundaries over a hard cut
fn pick_break(text: &str, start: usize, config: &ChunkConfig) -> usize {
    let lo = floor_boundary(text, start + config.min_size);
    let hi = floor_boundary(text, start + config.max_size);
    let region = &text[lo..hi];

    // Line boundary nearest the upper bound
    if let Some(pos) = region.rfind('\n') {
        return lo + pos + 1;
    }

    // Sentence boundary
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|p| region.rfind(p))
        .max();
    if let Some(pos) = sentence {
        return lo + pos + 2;
    }

    // Word boundary
    if let Some(pos) = region.rfind(' ') {
        return lo + pos + 1;
    }

    hi
}

/// Trailing slice of `preceding` carried into the next window. Starts at a
/// line start when the tail window contains an interior one, otherwise at
/// the nearest char boundary.
fn overlap_prefix(preceding: &str, overlap: usize) -> &str {
    if overlap == 0 || preceding.is_empty() {
        return "";
    }

    let from = ceil_boundary(preceding, preceding.len().saturating_sub(overlap));
    let tail = &preceding[from..];

    match tail.find('\n') {
        Some(pos) if pos + 1 < tail.len() => &tail[pos + 1..],
        _ => tail,
    }
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
