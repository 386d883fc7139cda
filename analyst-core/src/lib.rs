//! # analyst-core
//!
//! Turns a data-analysis question into a machine-computed answer by asking an
//! oracle for code, running it, and feeding failures back until the code
//! succeeds or the retry budget runs out.
//!
//! ## Core Concepts
//! - **Metadata planner**: one discovery script whose failures are absorbed
//! - **Synthesizer**: the first solution script, bound by a library allow-list
//! - **Execution engine**: runs code in a fresh namespace, returns bindings
//! - **Repair loop**: execute, patch, re-execute, at most `max_retries` times
//! - **Pipeline**: wires the stages together for one request

pub mod attachments;
pub mod engine;
pub mod extract;
pub mod manifest;
pub mod metadata;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod synthesize;
pub mod task;

pub use analyst_error::{Error, ErrorKind, ErrorStatus, Result};
pub use attachments::{summarize_attachments, NO_ATTACHMENTS};
pub use engine::{
    Bindings, ExecutionEngine, ExecutionError, ExecutionRequest, SandboxConfig, ScriptedEngine,
    SubprocessEngine,
};
pub use extract::{extract, extract_code, CodeText, Provenance};
pub use manifest::LibraryManifest;
pub use metadata::{format_metadata_list, MetadataItem, MetadataPlanner, NO_METADATA};
pub use oracle::{Oracle, OracleLedger, OraclePurpose};
pub use pipeline::{Pipeline, PipelineConfig, PipelineRun, DEFAULT_MAX_RETRIES};
pub use prompts::PromptSet;
pub use repair::{
    settle_outcome, AttemptRecord, ExecutionOutcome, RepairLoop, RepairReport, RunState, RunStatus,
};
pub use synthesize::{solution_prompt, Synthesizer};
pub use task::{AnalysisTask, Attachment};
