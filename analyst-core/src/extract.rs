//! Code extraction from free-form oracle replies

use crate::oracle::{Oracle, OraclePurpose};
use analyst_oracle::{ChatMessage, LlmProvider};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Where a piece of code came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Metadata,
    Solution,
    Repair,
}

/// Code ready for execution. Each repair produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeText {
    pub source: String,
    pub provenance: Provenance,
    /// Attempt that will execute this code (1-based)
    pub attempt: usize,
}

impl CodeText {
    pub fn new(source: impl Into<String>, provenance: Provenance, attempt: usize) -> Self {
        Self {
            source: source.into(),
            provenance,
            attempt,
        }
    }
}

fn fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?i)```(?:python|py)(?:[ \t]*\r?\n|\s+)([\s\S]+?)```").ok())
        .as_ref()
}

/// First non-blank fenced python block, trimmed; otherwise the whole reply,
/// trimmed. A blank block never yields empty code.
pub fn extract_code(raw: &str) -> String {
    let body = fence().and_then(|re| {
        re.captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .find(|body| !body.is_empty())
    });
    if let Some(body) = body {
        return body.to_string();
    }
    warn!(chars = raw.len(), "no fenced python block in reply, using raw text");
    raw.trim().to_string()
}

/// Wrap code in a python fence for prompts
pub(crate) fn fenced(code: &str) -> String {
    format!("```python\n{}\n```", code)
}

pub(crate) fn validation_messages(instructions: &str, code: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!(
            "Fix any syntax errors, missing imports, runtime bugs, or issues like invalid \
             syntax, missing colons or brackets, and undefined variables in the following \
             code. Do NOT change the logic or remove any part of the code:\n\n{}",
            fenced(code)
        )),
    ]
}

/// Extract code and optionally ask the oracle to proofread it once.
///
/// A failed proofreading call keeps the unvalidated code.
pub async fn extract<P: LlmProvider>(
    oracle: &Oracle<'_, P>,
    validate_instructions: &str,
    raw: &str,
    revalidate: bool,
) -> String {
    let code = extract_code(raw);
    if !revalidate {
        return code;
    }

    let messages = validation_messages(validate_instructions, &code);
    match oracle.ask(OraclePurpose::Validation, messages).await {
        Ok(reply) => {
            let validated = extract_code(&reply);
            debug!(before = code.len(), after = validated.len(), "code revalidated");
            validated
        }
        Err(e) => {
            warn!(error = %e, "revalidation call failed, keeping unvalidated code");
            code
        }
    }
}
