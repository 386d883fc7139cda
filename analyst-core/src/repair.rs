//! Repair loop - execute, and on failure ask the oracle for a patch
//!
//! The loop is an explicit state machine. Every execution leaves an
//! immutable [`AttemptRecord`] behind, and the number of executions never
//! exceeds `max_retries`.

use crate::engine::{Bindings, ExecutionEngine, ExecutionRequest};
use crate::extract::{extract, fenced, CodeText, Provenance};
use crate::oracle::{Oracle, OraclePurpose};
use analyst_oracle::{ChatMessage, LlmProvider};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const RESULT_BINDING: &str = "result";
pub const ERROR_LIST_BINDING: &str = "error_list";

/// What one execution produced. An empty `error_list` means success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub result: Value,
    pub error_list: Vec<String>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.error_list.is_empty()
    }
}

/// Snapshot of one attempt
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub code: CodeText,
    pub outcome: ExecutionOutcome,
    /// Set when the repair call that followed this attempt failed
    pub repair_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Generated,
    Executing,
    NeedsRepair { errors: Vec<String> },
    Repairing { errors: Vec<String> },
    Succeeded,
    Exhausted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

/// How a run ended. Exhaustion still carries the last result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub status: RunStatus,
    pub result: Value,
    pub attempts: usize,
    pub final_code: CodeText,
    pub history: Vec<AttemptRecord>,
}

/// Turn raw bindings into an outcome.
///
/// A missing `result` keeps `prior`. A string `result` that parses as JSON is
/// replaced by the parsed value. With `strict`, missing bindings are errors.
pub fn settle_outcome(mut bindings: Bindings, prior: &Value, strict: bool) -> ExecutionOutcome {
    let mut error_list = Vec::new();

    let result = match bindings.remove(RESULT_BINDING) {
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(value) => value,
        None => {
            if strict {
                error_list.push(format!("`{}` was not defined by the code", RESULT_BINDING));
            }
            prior.clone()
        }
    };

    match bindings.remove(ERROR_LIST_BINDING) {
        Some(Value::Array(items)) => {
            error_list.extend(items.into_iter().map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            }));
        }
        Some(Value::Null) => {}
        Some(other) => error_list.push(format!("`{}` is not a list: {}", ERROR_LIST_BINDING, other)),
        None if strict => {
            error_list.push(format!("`{}` was not defined by the code", ERROR_LIST_BINDING))
        }
        None => warn!("code did not define `{}`, treating it as empty", ERROR_LIST_BINDING),
    }

    ExecutionOutcome { result, error_list }
}

pub fn repair_messages(fix_instructions: &str, code: &str, errors: &[String]) -> Vec<ChatMessage> {
    let rendered = serde_json::to_string_pretty(errors).unwrap_or_default();
    vec![
        ChatMessage::system(fix_instructions),
        ChatMessage::user(format!(
            "Here is the code:\n\n{}\n\nHere are the errors:\n{}\n\nReturn the fixed full code:",
            fenced(code),
            rendered
        )),
    ]
}

pub struct RepairLoop<'a> {
    pub fix_instructions: &'a str,
    pub max_retries: usize,
    pub strict_output_contract: bool,
}

impl RepairLoop<'_> {
    /// Drive `code` to success or until the attempt budget is spent.
    pub async fn run<P: LlmProvider, E: ExecutionEngine>(
        &self,
        oracle: &Oracle<'_, P>,
        engine: &E,
        code: CodeText,
    ) -> RepairReport {
        let request = ExecutionRequest::capturing([RESULT_BINDING, ERROR_LIST_BINDING]);
        let mut code = code;
        let mut attempt = 1;
        let mut result = Value::Object(Default::default());
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut state = RunState::Generated;

        while !state.is_terminal() {
            state = match state {
                RunState::Generated => RunState::Executing,

                RunState::Executing => {
                    info!(attempt, max = self.max_retries, "executing code");
                    let outcome = match engine.execute(&code.source, &request).await {
                        Ok(bindings) => settle_outcome(bindings, &result, self.strict_output_contract),
                        Err(e) => ExecutionOutcome {
                            result: result.clone(),
                            error_list: vec![e.to_string()],
                        },
                    };
                    result = outcome.result.clone();
                    let next = if outcome.is_success() {
                        RunState::Succeeded
                    } else {
                        warn!(attempt, errors = ?outcome.error_list, "attempt failed");
                        RunState::NeedsRepair {
                            errors: outcome.error_list.clone(),
                        }
                    };
                    history.push(AttemptRecord {
                        attempt,
                        code: code.clone(),
                        outcome,
                        repair_error: None,
                    });
                    next
                }

                RunState::NeedsRepair { errors } => {
                    if attempt < self.max_retries {
                        RunState::Repairing { errors }
                    } else {
                        RunState::Exhausted
                    }
                }

                RunState::Repairing { errors } => {
                    let messages = repair_messages(self.fix_instructions, &code.source, &errors);
                    code = match oracle.ask(OraclePurpose::Repair, messages).await {
                        Ok(raw) => {
                            let source = extract(oracle, "", &raw, false).await;
                            debug!(attempt = attempt + 1, code = %source, "repaired code");
                            CodeText::new(source, Provenance::Repair, attempt + 1)
                        }
                        Err(e) => {
                            warn!(error = %e, "repair call failed, re-running the same code");
                            if let Some(last) = history.last_mut() {
                                last.repair_error = Some(e.to_string());
                            }
                            CodeText::new(code.source, code.provenance, attempt + 1)
                        }
                    };
                    attempt += 1;
                    RunState::Executing
                }

                terminal => terminal,
            };
        }

        let status = if state == RunState::Succeeded {
            info!(attempt, "code succeeded");
            RunStatus::Succeeded
        } else {
            warn!(attempts = attempt, "retry budget exhausted, returning last result");
            RunStatus::Exhausted
        };

        RepairReport {
            status,
            result,
            attempts: attempt,
            final_code: code,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutionError, ScriptedEngine};
    use analyst_oracle::{ProviderError, ScriptedProvider};
    use serde_json::json;

    fn bindings(result: Value, errors: Value) -> Bindings {
        let mut b = Bindings::new();
        b.insert(RESULT_BINDING.into(), result);
        b.insert(ERROR_LIST_BINDING.into(), errors);
        b
    }

    fn repair_loop(max_retries: usize) -> RepairLoop<'static> {
        RepairLoop {
            fix_instructions: "fix it",
            max_retries,
            strict_output_contract: false,
        }
    }

    #[test]
    fn test_settle_parses_json_string_result() {
        let outcome = settle_outcome(bindings(json!("{\"a\": 1}"), json!([])), &json!({}), false);
        assert_eq!(outcome.result, json!({"a": 1}));
        assert!(outcome.is_success());

        let outcome = settle_outcome(bindings(json!("plain text"), json!([])), &json!({}), false);
        assert_eq!(outcome.result, json!("plain text"));
    }

    #[test]
    fn test_settle_missing_bindings() {
        let prior = json!({"kept": true});
        let outcome = settle_outcome(Bindings::new(), &prior, false);
        assert_eq!(outcome.result, prior);
        assert!(outcome.is_success());

        let outcome = settle_outcome(Bindings::new(), &prior, true);
        assert_eq!(outcome.result, prior);
        assert_eq!(outcome.error_list.len(), 2);
    }

    #[test]
    fn test_settle_error_list_shapes() {
        let outcome = settle_outcome(bindings(json!(1), json!(["bad", 3])), &json!({}), false);
        assert_eq!(outcome.error_list, vec!["bad", "3"]);

        let outcome = settle_outcome(bindings(json!(1), Value::Null), &json!({}), false);
        assert!(outcome.is_success());

        let outcome = settle_outcome(bindings(json!(1), json!("oops")), &json!({}), false);
        assert_eq!(outcome.error_list.len(), 1);
    }

    #[test]
    fn test_repair_messages() {
        let messages = repair_messages("fix it", "x = 1 / 0", &["ZeroDivisionError: division by zero".into()]);
        assert_eq!(messages[0].content, "fix it");
        assert_eq!(
            messages[1].content,
            "Here is the code:\n\n```python\nx = 1 / 0\n```\n\nHere are the errors:\n\
             [\n  \"ZeroDivisionError: division by zero\"\n]\n\nReturn the fixed full code:"
        );
    }

    #[tokio::test]
    async fn test_success_on_second_attempt() {
        let provider = ScriptedProvider::from_replies(["```python\nfixed()\n```"]);
        let oracle = Oracle::new(&provider);
        let engine = ScriptedEngine::new();
        engine.push_error(ExecutionError::Raised {
            message: "NameError: name 'pd' is not defined".into(),
            traceback: None,
        });
        engine.push_bindings(bindings(json!({"answer": 42}), json!([])));

        let report = repair_loop(7)
            .run(&oracle, &engine, CodeText::new("broken()", Provenance::Solution, 1))
            .await;

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.result, json!({"answer": 42}));
        assert_eq!(report.final_code.provenance, Provenance::Repair);
        assert_eq!(engine.executed(), vec!["broken()", "fixed()"]);
        assert_eq!(report.history[0].outcome.error_list, vec!["NameError: name 'pd' is not defined"]);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_repair_call_reruns_same_code() {
        let provider = ScriptedProvider::new();
        provider.push_error(ProviderError::Network("reset".into()));
        let oracle = Oracle::new(&provider);
        let engine = ScriptedEngine::new();
        engine.push_bindings(bindings(json!(1), json!(["partial"])));
        engine.push_bindings(bindings(json!(2), json!([])));

        let report = repair_loop(3)
            .run(&oracle, &engine, CodeText::new("code", Provenance::Solution, 1))
            .await;

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.result, json!(2));
        assert_eq!(engine.executed(), vec!["code", "code"]);
        assert!(report.history[0].repair_error.is_some());
    }

    #[tokio::test]
    async fn test_single_attempt_budget_never_repairs() {
        let provider = ScriptedProvider::new();
        let oracle = Oracle::new(&provider);
        let engine = ScriptedEngine::new();
        engine.push_bindings(bindings(json!("last"), json!(["still wrong"])));

        let report = repair_loop(1)
            .run(&oracle, &engine, CodeText::new("code", Provenance::Solution, 1))
            .await;

        assert_eq!(report.status, RunStatus::Exhausted);
        assert_eq!(report.result, json!("last"));
        assert_eq!(provider.call_count(), 0);
    }
}
