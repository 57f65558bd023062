//! Deck import and export.
//!
//! Text export writes one `question|answer` line per card, which spaced
//! repetition apps import directly. JSON export writes the
//! `{"flashcards": [...]}` layout used everywhere else in the crate.

use crate::error::EngineError;
use crate::types::FlashcardSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(EngineError::invalid(format!("unknown export format '{other}'"))),
        }
    }
}

/// Collapse line breaks so every card stays on one line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One `question|answer` line per card.
pub fn to_text(set: &FlashcardSet) -> String {
    set.iter()
        .map(|card| format!("{}|{}\n", single_line(&card.question), single_line(&card.answer)))
        .collect()
}

/// Write `set` to `path` in `format`, creating parent directories.
pub fn export(set: &FlashcardSet, path: &Path, format: ExportFormat) -> Result<PathBuf, EngineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let contents = match format {
        ExportFormat::Text => to_text(set),
        ExportFormat::Json => serde_json::to_string_pretty(set)?,
    };
    std::fs::write(path, contents)?;
    info!(path = %path.display(), cards = set.len(), format = %format, "Exported deck");
    Ok(path.to_path_buf())
}

/// Write both formats as `<dir>/<stem>.txt` and `<dir>/<stem>.json`.
pub fn export_all(set: &FlashcardSet, dir: &Path, stem: &str) -> Result<Vec<PathBuf>, EngineError> {
    [ExportFormat::Text, ExportFormat::Json]
        .into_iter()
        .map(|format| export(set, &dir.join(format!("{stem}.{}", format.extension())), format))
        .collect()
}

/// Read a deck saved as `{"flashcards": [...]}` or as a bare array.
pub fn load_deck(path: &Path) -> Result<FlashcardSet, EngineError> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let set = if value.is_array() {
        FlashcardSet::new(serde_json::from_value(value)?)
    } else {
        serde_json::from_value(value)?
    };
    Ok(set)
}
