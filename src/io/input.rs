use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// File types the discovery step understands
const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "txt", "pdf"];

/// Yield `(conversation_id, raw_text)` pairs for a file or directory.
///
/// - `.csv`: each row is one conversation; non-empty cells are joined with
///   newlines so multi-cell text keeps its separation. The header row is
///   skipped.
/// - `.txt`: the whole file is one conversation.
/// - `.pdf`: page texts are aggregated into one conversation.
///
/// Unreadable files inside a directory are reported and skipped; the rest
/// of the batch continues.
pub fn discover_conversations(path: &Path) -> Result<Vec<(String, String)>> {
    if !path.is_dir() {
        return read_file(path);
    }

    let mut files: Vec<_> = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read input directory {path:?}"))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_supported(p))
        .collect();
    files.sort();

    let mut items = Vec::new();
    for file in files {
        match read_file(&file) {
            Ok(mut found) => items.append(&mut found),
            Err(e) => warn!("Skipping unreadable input {:?}: {:#}", file, e),
        }
    }

    Ok(items)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn read_file(path: &Path) -> Result<Vec<(String, String)>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => read_spreadsheet_rows(path),
        "txt" => read_text_file(path),
        "pdf" => read_pdf(path),
        other => anyhow::bail!("unsupported file type: .{other}"),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("input")
        .to_string()
}

/// Each spreadsheet row becomes a separate conversation
fn read_spreadsheet_rows(path: &Path) -> Result<Vec<(String, String)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open spreadsheet {path:?}"))?;

    let stem = file_stem(path);
    let mut items = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping malformed row {} in {:?}: {}", index + 1, path, e);
                continue;
            }
        };

        let cells: Vec<&str> = row
            .iter()
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();
        if cells.is_empty() {
            continue;
        }

        items.push((format!("{}_row{}", stem, index + 1), cells.join("\n")));
    }

    Ok(items)
}

fn read_text_file(path: &Path) -> Result<Vec<(String, String)>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read text file {path:?}"))?;
    let text = String::from_utf8_lossy(&bytes);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Ok(vec![]);
    }
    Ok(vec![(file_stem(path), trimmed.to_string())])
}

fn read_pdf(path: &Path) -> Result<Vec<(String, String)>> {
    let document =
        lopdf::Document::load(path).with_context(|| format!("Failed to load PDF {path:?}"))?;

    let mut pages = Vec::new();
    for (&number, _) in document.get_pages().iter() {
        match document.extract_text(&[number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text.trim().to_string()),
            Ok(_) => {}
            Err(e) => warn!("Failed to extract page {} of {:?}: {}", number, path, e),
        }
    }

    if pages.is_empty() {
        warn!("No extractable text in {:?}", path);
        return Ok(vec![]);
    }

    Ok(vec![(file_stem(path), pages.join("\n"))])
}
