use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::models::{ChatRecord, Role};

/// A record as the model emitted it, before validation. Every field is
/// optional here so one malformed object cannot reject the whole array.
#[derive(Debug, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub time: Option<Value>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Strict structural parse: the text must be a JSON array of objects.
pub fn parse_raw_records(json_text: &str) -> Result<Vec<RawRecord>, serde_json::Error> {
    serde_json::from_str(json_text)
}

/// Coerce raw records into the validated shape.
///
/// Unknown role values map to `Unknown` rather than rejecting the array;
/// a record with no usable message is dropped with a warning, not fatal.
pub fn validate_records(raw: Vec<RawRecord>) -> Vec<ChatRecord> {
    let mut records = Vec::with_capacity(raw.len());

    for (index, record) in raw.into_iter().enumerate() {
        let Some(message) = record.message.filter(|m| !m.trim().is_empty()) else {
            warn!("Dropping record {} with no message", index);
            continue;
        };

        let role = record
            .role
            .as_deref()
            .map(Role::from_label)
            .unwrap_or(Role::Unknown);

        let speaker = record
            .speaker
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        records.push(ChatRecord {
            time: normalize_time(record.time),
            speaker,
            role,
            message,
        });
    }

    records
}

fn normalize_time(time: Option<Value>) -> Option<String> {
    match time {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        // Numeric timestamps occasionally come back unquoted
        Some(other) => Some(other.to_string()),
    }
}
