//! Scripted engine - a deterministic stand-in for an interpreter
//!
//! Mirrors the scripted oracle: queued outcomes first, then an optional
//! responder that sees the code. Every executed script is recorded.

use super::{Bindings, ExecutionEngine, ExecutionError, ExecutionRequest};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

type Responder = Box<dyn Fn(&str) -> Result<Bindings, ExecutionError> + Send + Sync>;

#[derive(Default)]
pub struct ScriptedEngine {
    queue: Mutex<VecDeque<Result<Bindings, ExecutionError>>>,
    responder: Option<Responder>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<Bindings, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn push_bindings(&self, bindings: Bindings) {
        lock(&self.queue).push_back(Ok(bindings));
    }

    pub fn push_error(&self, error: ExecutionError) {
        lock(&self.queue).push_back(Err(error));
    }

    /// Code of every execution so far, oldest first
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    pub fn execution_count(&self) -> usize {
        lock(&self.executed).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        code: &str,
        request: &ExecutionRequest,
    ) -> Result<Bindings, ExecutionError> {
        lock(&self.executed).push(code.to_string());

        let queued = lock(&self.queue).pop_front();
        let mut bindings = match (queued, &self.responder) {
            (Some(outcome), _) => outcome?,
            (None, Some(responder)) => responder(code)?,
            (None, None) => {
                return Err(ExecutionError::Raised {
                    message: "RuntimeError: engine script exhausted".to_string(),
                    traceback: None,
                })
            }
        };
        bindings.retain(|name, _| request.capture.contains(name));
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_only_requested_bindings_are_returned() {
        let engine = ScriptedEngine::new();
        let mut bindings = Bindings::new();
        bindings.insert("result".into(), json!(1));
        bindings.insert("scratch".into(), json!("tmp"));
        engine.push_bindings(bindings);

        let out = engine
            .execute("result = 1", &ExecutionRequest::capturing(["result"]))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(engine.executed(), vec!["result = 1"]);
    }

    #[tokio::test]
    async fn test_exhausted_script_raises() {
        let engine = ScriptedEngine::new();
        let err = engine
            .execute("x", &ExecutionRequest::capturing(["result"]))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("RuntimeError"));
        assert_eq!(engine.execution_count(), 1);
    }
}
