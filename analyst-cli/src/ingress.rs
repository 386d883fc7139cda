//! Filesystem ingress: question file, attachments, answer normalization

use analyst_core::{AnalysisTask, Attachment};
use analyst_error::{Error, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const QUESTION_FILES: [&str; 2] = ["question.txt", "questions.txt"];

/// UTF-8 when possible, Latin-1 otherwise.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

pub fn read_question(path: &Path) -> Result<AnalysisTask> {
    let bytes = std::fs::read(path).map_err(|e| {
        Error::from(e)
            .with_operation("ingress::read_question")
            .with_context("path", path.display().to_string())
    })?;
    AnalysisTask::new(decode_text(&bytes))
        .map_err(|e| e.with_context("path", path.display().to_string()))
}

pub fn is_question_file(name: &str) -> bool {
    QUESTION_FILES.iter().any(|q| q.eq_ignore_ascii_case(name))
}

pub fn guess_content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "parquet" => "application/vnd.apache.parquet",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "db" | "sqlite" => "application/vnd.sqlite3",
        _ => "application/octet-stream",
    }
}

/// `<stem>_<stamp><ext>`, e.g. `data_20250101_120000.csv`
pub fn stamped_name(filename: &str, stamp: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext),
        None => format!("{}_{}", stem, stamp),
    }
}

/// Read every attachment, copy it into `tmp_dir` under a stamped name and
/// point the descriptor at the absolute copy. Question files are skipped.
pub fn collect_attachments(paths: &[PathBuf], tmp_dir: &Path, stamp: &str) -> Result<Vec<Attachment>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(tmp_dir).map_err(|e| {
        Error::from(e)
            .with_operation("ingress::create_tmp_dir")
            .with_context("path", tmp_dir.display().to_string())
    })?;
    let tmp_dir = std::fs::canonicalize(tmp_dir)?;

    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::invalid_argument("attachment path has no file name")
                    .with_operation("ingress::collect_attachments")
                    .with_context("path", path.display().to_string())
            })?
            .to_string();
        if is_question_file(&filename) {
            debug!(file = %filename, "skipping question file in attachments");
            continue;
        }

        let content = std::fs::read(path).map_err(|e| {
            Error::from(e)
                .with_operation("ingress::read_attachment")
                .with_context("path", path.display().to_string())
        })?;
        let saved = tmp_dir.join(stamped_name(&filename, stamp));
        std::fs::write(&saved, &content).map_err(|e| {
            Error::from(e)
                .with_operation("ingress::save_attachment")
                .with_context("path", saved.display().to_string())
        })?;
        info!(file = %filename, bytes = content.len(), saved = %saved.display(), "attachment saved");

        let content_type = guess_content_type(&filename);
        attachments.push(Attachment::new(filename, content, content_type).with_tmp_path(saved));
    }
    Ok(attachments)
}

/// A string answer that is itself JSON is parsed; any other string is
/// wrapped as `{"output": ...}`.
pub fn normalize_answer(answer: Value) -> Value {
    match answer {
        Value::String(s) => serde_json::from_str(&s).unwrap_or_else(|_| json!({ "output": s })),
        other => other,
    }
}
