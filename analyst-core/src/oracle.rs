//! Per-run view of the oracle with call accounting

use analyst_oracle::{ChatMessage, CompletionRequest, LlmProvider, ProviderError, UsageTracker};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Why an oracle call was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OraclePurpose {
    Metadata,
    Solution,
    Validation,
    Repair,
}

impl OraclePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Solution => "solution",
            Self::Validation => "validation",
            Self::Repair => "repair",
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct OracleLedger {
    pub metadata_calls: usize,
    pub solution_calls: usize,
    pub validation_calls: usize,
    pub repair_calls: usize,
    pub failed_calls: usize,
    pub usage: UsageTracker,
}

impl OracleLedger {
    pub fn total_calls(&self) -> usize {
        self.metadata_calls + self.solution_calls + self.validation_calls + self.repair_calls
    }

    fn count(&mut self, purpose: OraclePurpose) {
        match purpose {
            OraclePurpose::Metadata => self.metadata_calls += 1,
            OraclePurpose::Solution => self.solution_calls += 1,
            OraclePurpose::Validation => self.validation_calls += 1,
            OraclePurpose::Repair => self.repair_calls += 1,
        }
    }
}

pub struct Oracle<'a, P> {
    provider: &'a P,
    ledger: Mutex<OracleLedger>,
}

impl<'a, P: LlmProvider> Oracle<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            ledger: Mutex::new(OracleLedger::default()),
        }
    }

    /// Send one conversation and return the trimmed reply text.
    pub async fn ask(
        &self,
        purpose: OraclePurpose,
        messages: Vec<ChatMessage>,
    ) -> Result<String, ProviderError> {
        debug!(
            provider = self.provider.name(),
            purpose = purpose.as_str(),
            turns = messages.len(),
            "oracle call"
        );
        self.lock().count(purpose);

        match self.provider.complete(CompletionRequest::new(messages)).await {
            Ok(response) => {
                let model = if response.model.is_empty() {
                    self.provider.default_model().to_string()
                } else {
                    response.model.clone()
                };
                self.lock().usage.track(&model, &response.usage);
                Ok(response.text())
            }
            Err(e) => {
                self.lock().failed_calls += 1;
                Err(e)
            }
        }
    }

    pub fn ledger(&self) -> OracleLedger {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, OracleLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}
