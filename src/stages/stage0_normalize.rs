use std::sync::LazyLock;

use regex::Regex;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("url regex"));

static NOISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[<>\[\]|\\]").expect("noise regex"));

static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-=_]{3,}").expect("rule regex"));

static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(conversation id|session id|chat transcript|internal participant|bot/flow)\b")
        .expect("meta regex")
});

// Sentence-final punctuation followed by a name-like token carrying an
// inline ":"/"-" delimiter. Matches spaces only, so inserted newlines do
// not re-trigger the rule.
static TURN_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?]) +([A-Za-z][a-z]* ?[:-])").expect("turn break regex"));

static CUE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i) +((?:agent|user|customer|client|rep) ?[:-])").expect("cue break regex")
});

static MULTISPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").expect("space regex"));

/// Clean raw extracted text and insert probable speaker-boundary breaks.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`. Never fails;
/// empty or whitespace-only input yields an empty string.
pub fn normalize(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");
    text = text.replace('\t', " ");
    // Cell separators some exporters emit between messages
    text = text.replace("||", "\n").replace("｜｜", "\n");

    let text = URL_RE.replace_all(&text, "");
    let text = NOISE_RE.replace_all(&text, " ");
    let text = RULE_RE.replace_all(&text, " ");

    let text = TURN_BREAK_RE.replace_all(&text, "$1\n$2");
    let text = CUE_BREAK_RE.replace_all(&text, "\n$1");

    let text = MULTISPACE_RE.replace_all(&text, " ");

    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if META_RE.is_match(line) {
            continue;
        }
        lines.push(line);
    }

    lines.join("\n")
}
