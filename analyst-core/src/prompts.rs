//! Prompt texts used by the pipeline
//!
//! Built-in defaults can be replaced file by file from a prompt directory.

use analyst_error::{Error, Result};
use std::path::Path;
use tracing::debug;

pub const METADATA_FILE: &str = "extract_metadata.txt";
pub const VALIDATE_FILE: &str = "validate_code.txt";
pub const FIX_FILE: &str = "fix_code.txt";

const DEFAULT_METADATA: &str = "\
You are a data engineer preparing the ground for a data analysis task.
Write a short Python script that identifies every external data source the task
needs (web pages, APIs, downloadable files, attached files) and describes it.

Rules:
- For each source, collect lightweight metadata only: for tables, the column
  names, dtypes and the first few rows; for web pages, the titles and the
  headers of the relevant HTML tables; for files, the format and schema.
- Do not answer the task itself and do not download large payloads.
- By the end of the script, define `metadata_list`: a list of dicts, each with
  the keys `url` (the source location or file path) and `metadata` (a string).
- If no external source is needed, set `metadata_list = []`.
- The script must run as-is with `exec()`; call any function you define.
- Return a single Python code block and nothing else.";

const DEFAULT_VALIDATE: &str = "\
You are a meticulous Python reviewer. You receive a script that will be run
unattended with `exec()`. Correct syntax errors, missing imports, undefined
names and obvious runtime bugs. Keep the logic, the variable names and every
part of the script unchanged otherwise. Return the complete script in a single
Python code block and nothing else.";

const DEFAULT_FIX: &str = "\
You are an expert Python code fixer. Your job is to correct any errors in the \
given Python code based on the errors shown below. Do not remove or alter \
correct logic unnecessarily. Fix only what is needed to resolve the errors. \
Return only the corrected code inside a Python code block.";

/// System instructions for the three fixed-purpose oracle calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub metadata: String,
    pub validate: String,
    pub fix: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            metadata: DEFAULT_METADATA.to_string(),
            validate: DEFAULT_VALIDATE.to_string(),
            fix: DEFAULT_FIX.to_string(),
        }
    }
}

impl PromptSet {
    /// Start from the defaults and replace each prompt whose file exists in
    /// `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut prompts = Self::default();
        for (file, slot) in [
            (METADATA_FILE, &mut prompts.metadata),
            (VALIDATE_FILE, &mut prompts.validate),
            (FIX_FILE, &mut prompts.fix),
        ] {
            let path = dir.join(file);
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::from(e)
                    .with_operation("prompts::load")
                    .with_context("path", path.display().to_string())
            })?;
            debug!(path = %path.display(), "prompt override loaded");
            *slot = text.trim().to_string();
        }
        Ok(prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mention_contract_names() {
        let prompts = PromptSet::default();
        assert!(prompts.metadata.contains("metadata_list"));
        assert!(prompts.fix.contains("Python code block"));
    }

    #[test]
    fn test_load_overrides_present_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VALIDATE_FILE), "  check the code  \n").unwrap();

        let prompts = PromptSet::load(dir.path()).unwrap();
        assert_eq!(prompts.validate, "check the code");
        assert_eq!(prompts.metadata, PromptSet::default().metadata);
        assert_eq!(prompts.fix, PromptSet::default().fix);
    }

    #[test]
    fn test_load_missing_dir_keeps_defaults() {
        let prompts = PromptSet::load("/nonexistent/prompts").unwrap();
        assert_eq!(prompts, PromptSet::default());
    }
}
