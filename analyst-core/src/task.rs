//! Inputs of a run: the task text and its attachments

use analyst_error::{Error, Result};
use std::path::PathBuf;

/// What must be computed. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTask {
    text: String,
}

impl AnalysisTask {
    /// Trims the text; empty or whitespace-only text is rejected before any
    /// oracle call is made.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_argument("task text is empty")
                .with_operation("task::new"));
        }
        Ok(Self {
            text: trimmed.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// A file supplied with the task.
///
/// The pipeline only reads the name, size, content type and path; the bytes
/// are kept so the ingress layer owns a single descriptor per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub tmp_path: Option<PathBuf>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content,
            content_type: content_type.into(),
            tmp_path: None,
        }
    }

    pub fn with_tmp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_path = Some(path.into());
        self
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}
