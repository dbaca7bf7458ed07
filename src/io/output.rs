use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::ConversationResult;

/// Write one tabular artifact for a conversation: columns
/// `time,speaker,role,message` in record order. Returns the artifact path.
pub fn write_conversation_csv(result: &ConversationResult, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {output_dir:?}"))?;

    let path = output_dir.join(format!("{}_clean.csv", result.conversation_id));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create output file {path:?}"))?;

    writer.write_record(["time", "speaker", "role", "message"])?;
    for record in &result.records {
        writer.write_record([
            record.time.as_deref().unwrap_or(""),
            &record.speaker,
            record.role.as_str(),
            &record.message,
        ])?;
    }
    writer.flush().context("Failed to flush output file")?;

    Ok(path)
}
