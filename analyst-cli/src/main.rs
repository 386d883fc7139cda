//! # Analyst CLI
//!
//! Answers a data-analysis question by having a model write Python, running
//! it, and repairing it until it works.
//!
//! Usage:
//!   analyst run --questions <file> [--attach <file>]...
//!   analyst probe
//!
//! Examples:
//!   analyst run -q questions.txt -a data.csv --requirements requirements.txt
//!   ANALYST_PROVIDER=openai analyst run -q questions.txt
//!   analyst --log-dir logs run -q questions.txt --prompts prompts/

mod ingress;
mod logging;

use analyst_core::{
    LibraryManifest, Pipeline, PipelineConfig, PromptSet, SandboxConfig, SubprocessEngine,
};
use analyst_error::{Error, Result};
use analyst_oracle::{AnyProvider, ChatMessage, LlmProvider, ProviderConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "analyst")]
#[command(author, version, about = "Analyst - answers data-analysis questions with generated code")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "ANALYST_LOG_JSON")]
    json_logs: bool,

    /// Log at debug level (generated code, interpreter output)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write this run's log to a file in this directory
    #[arg(long, global = true, env = "ANALYST_SAVE_LOGS")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer the question in a file
    Run(RunArgs),
    /// Check that the configured model answers
    Probe {
        #[command(flatten)]
        provider: ProviderArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// File holding the question text
    #[arg(short, long)]
    questions: PathBuf,

    /// Data file for the analysis (repeatable)
    #[arg(short, long = "attach")]
    attachments: Vec<PathBuf>,

    /// pip requirements file listing the libraries generated code may use
    #[arg(long, env = "ANALYST_REQUIREMENTS")]
    requirements: Option<PathBuf>,

    /// Directory with extract_metadata.txt, validate_code.txt, fix_code.txt
    #[arg(long, env = "ANALYST_PROMPTS")]
    prompts: Option<PathBuf>,

    /// Where attachments are copied for the generated code to read
    #[arg(long, default_value = "tmp")]
    tmp_dir: PathBuf,

    /// JSON file with `pipeline` and `sandbox` sections
    #[arg(long, env = "ANALYST_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum executions of the solution code
    #[arg(long, env = "ANALYST_MAX_RETRIES")]
    max_retries: Option<usize>,

    /// Treat missing `result` or `error_list` as errors
    #[arg(long)]
    strict: bool,

    /// Skip the proofreading call after each generation
    #[arg(long)]
    no_revalidate: bool,

    /// Python interpreter for generated code
    #[arg(long, env = "ANALYST_PYTHON")]
    python: Option<String>,

    /// Wall-clock limit per execution, in seconds
    #[arg(long)]
    exec_timeout: Option<u64>,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Gemini,
    Openai,
    Anthropic,
    Local,
}

#[derive(Args)]
struct ProviderArgs {
    /// Model backend
    #[arg(long, env = "ANALYST_PROVIDER", value_enum, default_value = "gemini")]
    provider: ProviderKind,

    /// Model name; each backend has a default
    #[arg(long, env = "ANALYST_MODEL")]
    model: Option<String>,

    /// Override the API endpoint (required for `local`)
    #[arg(long, env = "ANALYST_BASE_URL")]
    base_url: Option<String>,

    /// API key; falls back to GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY
    #[arg(long, env = "ANALYST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// HTTP timeout for model calls, in seconds
    #[arg(long)]
    llm_timeout: Option<u64>,
}

impl ProviderArgs {
    fn key(&self, var: &str) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::config_invalid(format!("no API key: pass --api-key or set {}", var))
                    .with_operation("cli::provider")
            })
    }

    fn to_config(&self) -> Result<ProviderConfig> {
        let mut config = match self.provider {
            ProviderKind::Gemini => ProviderConfig::gemini(self.key("GEMINI_API_KEY")?),
            ProviderKind::Openai => ProviderConfig::openai(self.key("OPENAI_API_KEY")?),
            ProviderKind::Anthropic => ProviderConfig::anthropic(self.key("ANTHROPIC_API_KEY")?),
            ProviderKind::Local => {
                let base_url = self.base_url.clone().ok_or_else(|| {
                    Error::config_invalid("the local provider needs --base-url")
                        .with_operation("cli::provider")
                })?;
                let model = self.model.clone().ok_or_else(|| {
                    Error::config_invalid("the local provider needs --model")
                        .with_operation("cli::provider")
                })?;
                ProviderConfig::local(base_url, model)
            }
        };
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(secs) = self.llm_timeout {
            config = config.with_timeout(secs);
        }
        Ok(config)
    }

    fn build(&self) -> Result<AnyProvider> {
        let provider = AnyProvider::from_config(self.to_config()?)?;
        info!(provider = provider.name(), model = provider.default_model(), "model backend ready");
        Ok(provider)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    pipeline: PipelineConfig,
    sandbox: SandboxConfig,
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::from(e)
            .with_operation("cli::load_config")
            .with_context("path", path.display().to_string())
    })?;
    serde_json::from_str(&text).map_err(|e| {
        Error::config_invalid(format!("invalid config file: {}", e))
            .with_operation("cli::load_config")
            .with_context("path", path.display().to_string())
            .set_source(e)
    })
}

impl RunArgs {
    fn configs(&self) -> Result<(PipelineConfig, SandboxConfig)> {
        let FileConfig {
            mut pipeline,
            mut sandbox,
        } = match &self.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        if let Some(max) = self.max_retries {
            pipeline.max_retries = max;
        }
        if self.strict {
            pipeline.strict_output_contract = true;
        }
        if self.no_revalidate {
            pipeline.revalidate_metadata = false;
            pipeline.revalidate_solution = false;
        }
        if let Some(python) = &self.python {
            sandbox.interpreter = python.clone();
        }
        if let Some(secs) = self.exec_timeout {
            sandbox.timeout_secs = secs;
        }
        pipeline.validate()?;
        Ok((pipeline, sandbox))
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let started = Instant::now();

    let task = ingress::read_question(&args.questions)?;
    info!(question = %task, "question loaded");

    let manifest = match &args.requirements {
        Some(path) => LibraryManifest::from_requirements(path)?,
        None => LibraryManifest::default(),
    };
    if manifest.is_empty() {
        warn!("no allowed-library manifest given, generated code is unconstrained");
    }
    let prompts = match &args.prompts {
        Some(dir) => PromptSet::load(dir)?,
        None => PromptSet::default(),
    };
    let (pipeline_config, sandbox_config) = args.configs()?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let attachments = ingress::collect_attachments(&args.attachments, &args.tmp_dir, &stamp)?;

    let pipeline = Pipeline::new(args.provider.build()?, SubprocessEngine::new(sandbox_config))
        .with_config(pipeline_config)
        .with_prompts(prompts)
        .with_manifest(manifest);

    let outcome = pipeline.run(task, attachments).await?;
    if !outcome.succeeded() {
        warn!(attempts = outcome.attempts, "returning the last result after exhausting retries");
    }

    let answer = ingress::normalize_answer(outcome.result);
    let rendered = serde_json::to_string_pretty(&answer).map_err(|e| {
        Error::new(analyst_error::ErrorKind::SerializationFailed, e.to_string())
            .with_operation("cli::print_answer")
    })?;
    println!("{}", rendered);

    let minutes = started.elapsed().as_secs_f64() / 60.0;
    info!("total time taken: {:.2} minutes", minutes);
    Ok(())
}

async fn probe(args: ProviderArgs) -> Result<()> {
    let provider = args.build()?;
    let reply = provider
        .call(vec![ChatMessage::user("Reply with the single word: ready")])
        .await?;
    println!("{}: {}", provider.name(), reply);
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    match logging::init_logging(cli.json_logs, level, cli.log_dir.as_deref()) {
        Ok(Some(path)) => info!(path = %path.display(), "writing run log"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "run log unavailable, logging to stderr only"),
    }

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Probe { provider } => probe(provider).await,
    };

    if let Err(e) = result {
        error!(error = %e, "analyst failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_error::ErrorKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_run_args_parse() {
        let cli = parse(&[
            "analyst", "run", "-q", "questions.txt", "-a", "a.csv", "-a", "b.json",
            "--max-retries", "3", "--provider", "local", "--base-url", "http://localhost:11434/v1",
            "--model", "qwen2.5-coder",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.attachments.len(), 2);
        assert_eq!(args.tmp_dir, PathBuf::from("tmp"));

        let (pipeline, sandbox) = args.configs().unwrap();
        assert_eq!(pipeline.max_retries, 3);
        assert_eq!(sandbox.interpreter, "python3");

        let config = args.provider.to_config().unwrap();
        assert_eq!(config.default_model.as_deref(), Some("qwen2.5-coder"));
    }

    #[test]
    fn test_local_provider_needs_base_url() {
        let provider = ProviderArgs {
            provider: ProviderKind::Local,
            model: Some("m".into()),
            base_url: None,
            api_key: None,
            llm_timeout: None,
        };
        let err = provider.to_config().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let provider = ProviderArgs {
            base_url: Some("http://localhost:11434/v1".into()),
            ..provider
        };
        assert!(provider.to_config().is_ok());
    }

    #[test]
    fn test_config_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyst.json");
        std::fs::write(
            &path,
            r#"{"pipeline": {"max_retries": 5, "strict_output_contract": true}, "sandbox": {"timeout_secs": 60}}"#,
        )
        .unwrap();

        let cli = parse(&[
            "analyst", "run", "-q", "q.txt", "--config", path.to_str().unwrap(),
            "--exec-timeout", "30",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let (pipeline, sandbox) = args.configs().unwrap();
        assert_eq!(pipeline.max_retries, 5);
        assert!(pipeline.strict_output_contract);
        assert_eq!(sandbox.timeout_secs, 30);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let cli = parse(&["analyst", "run", "-q", "q.txt", "--max-retries", "0"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.configs().is_err());
    }
}
