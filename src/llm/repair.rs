//! Best-effort textual repair for near-valid model output.
//!
//! Model output is untrusted text until it parses. These helpers coerce
//! the common failure shapes (commentary around the array, trailing
//! commas, unterminated strings, unbalanced brackets) into parseable JSON
//! without touching output that is already valid.

use std::sync::LazyLock;

use regex::Regex;

static INVALID_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\([^"\\/bfnrtu])"#).expect("escape regex"));

static DOUBLE_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*,").expect("double comma regex"));

static TRAILING_COMMA_OBJ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("trailing comma regex"));

static TRAILING_COMMA_ARR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\]").expect("trailing comma regex"));

static ADJACENT_OBJECTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\}\s*\{").expect("adjacent objects regex"));

/// Slice the content between the first `[` and the last `]`, dropping any
/// commentary or code fences the model wrapped around the array. `None`
/// when no array shape is present at all.
pub fn extract_json_array(content: &str) -> Option<&str> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&content[start..=end])
}

/// Apply textual fixes to a JSON candidate. Purely syntactic; never
/// invokes the model.
pub fn repair_json(text: &str) -> String {
    let mut text = text.trim().to_string();

    // Smart quotes from chatty models
    text = text.replace(['\u{201c}', '\u{201d}'], "\"");

    // Raw control characters are never valid inside JSON strings
    text.retain(|c| c >= ' ' || c == '\n');

    let text = INVALID_ESCAPE_RE.replace_all(&text, "$1");
    let text = DOUBLE_COMMA_RE.replace_all(&text, ",");
    let text = ADJACENT_OBJECTS_RE.replace_all(&text, "},{");
    let text = TRAILING_COMMA_OBJ_RE.replace_all(&text, "}");
    let text = TRAILING_COMMA_ARR_RE.replace_all(&text, "]");
    let mut text = text.into_owned();

    // Close a string the model stopped generating mid-way through
    if text.matches('"').count() % 2 != 0 {
        text.push('"');
    }

    let open_braces = text.matches('{').count();
    let close_braces = text.matches('}').count();
    if open_braces > close_braces {
        // A dangling value separator would block the closers
        while text.trim_end().ends_with([',', ':']) {
            text.truncate(text.trim_end().len() - 1);
        }
        text.push_str(&"}".repeat(open_braces - close_braces));
    }

    let open_brackets = text.matches('[').count();
    let close_brackets = text.matches(']').count();
    if open_brackets > close_brackets {
        while text.trim_end().ends_with(',') {
            text.truncate(text.trim_end().len() - 1);
        }
        text.push_str(&"]".repeat(open_brackets - close_brackets));
    }

    text
}
