//! Plain-text document loading
//!
//! Files may start with header lines such as `Título: ...` and `Categoria: ...`.
//! Headers become document metadata and are removed from the body.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::types::Document;

/// A file that could not be loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFailure {
    pub source_path: String,
    pub error: String,
}

/// Documents read from a directory, plus the files that failed
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<LoadFailure>,
}

/// Reads text files into [`Document`]s
pub struct DocumentLoader {
    extensions: Vec<String>,
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(t[íi]tulo|title|categoria|category)\s*:\s*(.*?)\s*$")
            .expect("Invalid regex")
    })
}

impl DocumentLoader {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(config.extensions.clone())
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Load every matching file under `root`, recursively, in path order.
    ///
    /// Unreadable files are reported in the failures list.
    pub fn load_dir(&self, root: &Path) -> Result<LoadReport> {
        if !root.is_dir() {
            return Err(Error::invalid_input(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut report = LoadReport::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    report.failures.push(LoadFailure {
                        source_path: e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }

            let source_path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            match std::fs::read_to_string(entry.path()) {
                Ok(text) => report.documents.push(parse_document(&source_path, &text)),
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", source_path, e);
                    report.failures.push(LoadFailure {
                        source_path,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Loaded {} documents from {} ({} failures)",
            report.documents.len(),
            root.display(),
            report.failures.len()
        );
        Ok(report)
    }
}

/// Build a document from file text, reading and stripping leading header lines
pub fn parse_document(source_path: &str, text: &str) -> Document {
    let mut title = None;
    let mut category = None;
    let mut body_start = 0;

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let next = offset + line.len();
        if line.trim().is_empty() {
            offset = next;
            continue;
        }
        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        let Some(cap) = header_pattern().captures(line) else {
            break;
        };
        let key = cap[1].to_lowercase();
        let value = cap[2].to_string();
        if key == "categoria" || key == "category" {
            category = Some(value);
        } else {
            title = Some(value);
        }
        offset = next;
        body_start = next;
    }

    let body = text[body_start..].trim();
    let title = title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| file_stem(source_path).to_string());

    Document::new(title, category.unwrap_or_default(), source_path, body)
}

fn file_stem(source_path: &str) -> &str {
    let name = source_path
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(source_path);
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}
