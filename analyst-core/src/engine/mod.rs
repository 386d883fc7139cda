//! Execution engine - runs generated code and hands back named bindings
//!
//! The engine is a leaf: no retries, no oracle access. A failure is reported
//! as a single [`ExecutionError`] and partial bindings are never returned.

pub mod scripted;
pub mod subprocess;

pub use scripted::ScriptedEngine;
pub use subprocess::{SandboxConfig, SubprocessEngine};

use analyst_error::{Error, ErrorKind};
use serde_json::Value;
use std::collections::BTreeMap;

/// Variable name to JSON value
pub type Bindings = BTreeMap<String, Value>;

/// What to run the code with and what to bring back
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    /// Bindings to report after the code finishes. Absent names are omitted.
    pub capture: Vec<String>,
    /// Namespace the code starts from
    pub initial: Bindings,
}

impl ExecutionRequest {
    /// Fresh namespace where `__name__ == "__main__"`, so entry-point guards run.
    pub fn capturing<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut initial = Bindings::new();
        initial.insert("__name__".to_string(), Value::String("__main__".to_string()));
        Self {
            capture: names.into_iter().map(Into::into).collect(),
            initial,
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.initial.insert(name.into(), value);
        self
    }
}

/// Why an execution produced no bindings
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The code raised; carries `"<ExceptionType>: <message>"`
    #[error("{message}")]
    Raised {
        message: String,
        traceback: Option<String>,
    },

    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to start interpreter `{interpreter}`: {reason}")]
    Spawn { interpreter: String, reason: String },

    #[error("interpreter exited with status {code:?} without a report: {stderr}")]
    Crashed { code: Option<i32>, stderr: String },

    #[error("binding `{name}` is not JSON-serializable: {reason}")]
    Unserializable { name: String, reason: String },

    #[error("bindings report is {size} bytes, limit is {limit}")]
    OutputTooLarge { size: u64, limit: u64 },

    #[error("malformed bindings report: {0}")]
    Report(String),

    #[error("sandbox I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        let converted = match &err {
            ExecutionError::Timeout { .. } => Error::new(ErrorKind::ExecutionTimeout, err.to_string()),
            ExecutionError::Unserializable { name, reason } => {
                Error::contract_violated(name.clone(), reason.clone())
            }
            ExecutionError::Io(_) => Error::new(ErrorKind::IoFailed, err.to_string()),
            _ => Error::execution_failed(err.to_string()),
        };
        converted.with_operation("engine::execute").set_source(err)
    }
}

/// Runs code text in a fresh namespace
#[allow(async_fn_in_trait)]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        code: &str,
        request: &ExecutionRequest,
    ) -> Result<Bindings, ExecutionError>;
}
