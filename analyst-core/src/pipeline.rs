//! The pipeline - metadata, solution, then the repair loop
//!
//! One [`Pipeline`] can serve many runs; every run owns its own
//! [`PipelineRun`] and oracle ledger, so concurrent runs share nothing
//! mutable.

use crate::attachments::summarize_attachments;
use crate::engine::ExecutionEngine;
use crate::extract::CodeText;
use crate::manifest::LibraryManifest;
use crate::metadata::{MetadataItem, MetadataPlanner};
use crate::oracle::{Oracle, OracleLedger};
use crate::prompts::PromptSet;
use crate::repair::{AttemptRecord, RepairLoop, RunStatus};
use crate::synthesize::Synthesizer;
use crate::task::{AnalysisTask, Attachment};
use analyst_error::{Error, Result};
use analyst_oracle::LlmProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub const DEFAULT_MAX_RETRIES: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on executions of the solution code
    pub max_retries: usize,
    pub revalidate_metadata: bool,
    pub revalidate_solution: bool,
    /// Treat a missing `result` or `error_list` as an error
    pub strict_output_contract: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            revalidate_metadata: true,
            revalidate_solution: true,
            strict_output_contract: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::config_invalid("max_retries must be at least 1")
                .with_operation("pipeline::config"));
        }
        Ok(())
    }
}

/// Everything one request produced
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub task: AnalysisTask,
    pub attachments: Vec<Attachment>,
    pub metadata: Vec<MetadataItem>,
    pub code: CodeText,
    pub attempts: usize,
    pub result: Value,
    pub status: RunStatus,
    pub history: Vec<AttemptRecord>,
    pub ledger: OracleLedger,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

pub struct Pipeline<P, E> {
    provider: P,
    engine: E,
    config: PipelineConfig,
    prompts: PromptSet,
    manifest: LibraryManifest,
}

impl<P: LlmProvider, E: ExecutionEngine> Pipeline<P, E> {
    pub fn new(provider: P, engine: E) -> Self {
        Self {
            provider,
            engine,
            config: PipelineConfig::default(),
            prompts: PromptSet::default(),
            manifest: LibraryManifest::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_manifest(mut self, manifest: LibraryManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one request to a terminal state.
    ///
    /// Errors only when the configuration is invalid or the solution script
    /// could not be generated at all. Exhausting the retry budget is not an
    /// error; the last result is returned with [`RunStatus::Exhausted`].
    pub async fn run(&self, task: AnalysisTask, attachments: Vec<Attachment>) -> Result<PipelineRun> {
        self.config.validate()?;
        let oracle = Oracle::new(&self.provider);

        let summary = summarize_attachments(&attachments);
        debug!(attachments = %summary, "attachment inventory");

        let planner = MetadataPlanner {
            prompts: &self.prompts,
            manifest: &self.manifest,
            revalidate: self.config.revalidate_metadata,
        };
        let metadata = planner.plan(&oracle, &self.engine, &task, &summary).await;

        let synthesizer = Synthesizer {
            prompts: &self.prompts,
            manifest: &self.manifest,
            revalidate: self.config.revalidate_solution,
        };
        let code = synthesizer
            .synthesize(&oracle, &task, &metadata, &summary)
            .await
            .map_err(|e| e.with_context("task", task.text().to_string()))?;
        debug!(code = %code.source, "initial solution");

        let repair = RepairLoop {
            fix_instructions: &self.prompts.fix,
            max_retries: self.config.max_retries,
            strict_output_contract: self.config.strict_output_contract,
        };
        let report = repair.run(&oracle, &self.engine, code).await;

        let ledger = oracle.ledger();
        info!(
            status = ?report.status,
            attempts = report.attempts,
            oracle_calls = ledger.total_calls(),
            tokens = ledger.usage.total_tokens(),
            "run finished"
        );

        Ok(PipelineRun {
            task,
            attachments,
            metadata,
            code: report.final_code,
            attempts: report.attempts,
            result: report.result,
            status: report.status,
            history: report.history,
            ledger,
        })
    }
}
