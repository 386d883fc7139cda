//! Out-of-process engine: one interpreter process per execution
//!
//! Every execution gets a scratch directory that is the working directory of
//! the child and is removed afterwards. The child starts from a cleared
//! environment plus an allow-list, is killed when the wall-clock limit
//! passes, and reports its bindings through a JSON file written by a fixed
//! harness script.
//!
//! On unix the interpreter leads its own process group. The group is killed
//! as soon as the interpreter exits, so processes started by generated code
//! neither outlive the run nor keep its output pipes open.

use super::{Bindings, ExecutionEngine, ExecutionError, ExecutionRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const HARNESS: &str = include_str!("harness.py");

/// How long the output readers may run on after the interpreter exits
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Limits for the interpreter process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub interpreter: String,
    /// Wall-clock limit per execution
    pub timeout_secs: u64,
    /// Bytes of stdout and of stderr kept for logging
    pub max_output_bytes: usize,
    /// Largest bindings report accepted
    pub max_report_bytes: u64,
    /// Variables copied from the parent environment
    pub inherit_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 180,
            max_output_bytes: 64 * 1024,
            max_report_bytes: 16 * 1024 * 1024,
            inherit_env: ["PATH", "LANG", "HOME", "PYTHONPATH", "MPLBACKEND"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HarnessRequest<'a> {
    capture: &'a [String],
    initial: &'a Bindings,
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    traceback: Option<String>,
    #[serde(default)]
    bindings: Bindings,
    #[serde(default)]
    unserializable: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubprocessEngine {
    config: SandboxConfig,
}

impl SubprocessEngine {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn command(&self, arena: &Path) -> Command {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg("harness.py")
            .arg(arena.join("request.json"))
            .arg(arena.join("script.py"))
            .arg(arena.join("bindings.json"))
            .current_dir(arena)
            .env_clear()
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }
        for key in &self.config.inherit_env {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        cmd
    }

    async fn read_report(&self, path: &Path) -> Result<Option<HarnessReport>, ExecutionError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.len() > self.config.max_report_bytes {
            return Err(ExecutionError::OutputTooLarge {
                size: meta.len(),
                limit: self.config.max_report_bytes,
            });
        }
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ExecutionError::Report(e.to_string()))
    }
}

impl ExecutionEngine for SubprocessEngine {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn execute(
        &self,
        code: &str,
        request: &ExecutionRequest,
    ) -> Result<Bindings, ExecutionError> {
        let arena = tempfile::Builder::new().prefix("analyst-exec-").tempdir()?;
        let root = arena.path();

        let harness_request = HarnessRequest {
            capture: &request.capture,
            initial: &request.initial,
        };
        let request_json = serde_json::to_vec(&harness_request)
            .map_err(|e| ExecutionError::Report(e.to_string()))?;
        tokio::fs::write(root.join("harness.py"), HARNESS).await?;
        tokio::fs::write(root.join("script.py"), code).await?;
        tokio::fs::write(root.join("request.json"), request_json).await?;

        let mut child = self.command(root).spawn().map_err(|e| ExecutionError::Spawn {
            interpreter: self.config.interpreter.clone(),
            reason: e.to_string(),
        })?;
        let mut group = ProcessGroup(child.id());
        let limit = self.config.max_output_bytes;
        let mut stdout = tokio::spawn(read_capped(child.stdout.take(), limit));
        let mut stderr = tokio::spawn(read_capped(child.stderr.take(), limit));

        let secs = self.config.timeout_secs;
        let waited = tokio::time::timeout(Duration::from_secs(secs), child.wait()).await;
        group.kill();
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                warn!(timeout_secs = secs, "execution timed out, killing interpreter");
                stdout.abort();
                stderr.abort();
                return Err(ExecutionError::Timeout { secs });
            }
        };
        let out = collect_output(&mut stdout, "stdout").await;
        let err = collect_output(&mut stderr, "stderr").await;

        if !out.is_empty() {
            debug!(stdout = %String::from_utf8_lossy(&out), "interpreter stdout");
        }
        if !err.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&err), "interpreter stderr");
        }

        let report = match self.read_report(&root.join("bindings.json")).await? {
            Some(report) => report,
            None => {
                return Err(ExecutionError::Crashed {
                    code: status.code(),
                    stderr: String::from_utf8_lossy(&err).trim().to_string(),
                })
            }
        };

        if !report.ok {
            if let Some(tb) = &report.traceback {
                debug!(traceback = %tb, "generated code raised");
            }
            return Err(ExecutionError::Raised {
                message: report
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
                traceback: report.traceback,
            });
        }
        if let Some((name, reason)) = report.unserializable.into_iter().next() {
            return Err(ExecutionError::Unserializable { name, reason });
        }
        Ok(report.bindings)
    }
}

/// Keep the first `limit` bytes and drain the rest so the child never blocks
/// on a full pipe.
async fn read_capped<R>(stream: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let Some(mut stream) = stream else {
        return Ok(buf);
    };
    (&mut stream).take(limit as u64).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
    Ok(buf)
}

/// Output is only logged, so a reader that fails or outlives the grace
/// period yields nothing rather than failing the run.
async fn collect_output(reader: &mut JoinHandle<std::io::Result<Vec<u8>>>, stream: &str) -> Vec<u8> {
    match tokio::time::timeout(PIPE_GRACE, &mut *reader).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            debug!(stream, error = %e, "reading interpreter output failed");
            Vec::new()
        }
        Ok(Err(e)) => {
            debug!(stream, error = %e, "output reader stopped");
            Vec::new()
        }
        Err(_) => {
            reader.abort();
            warn!(stream, "interpreter output still open after exit, dropping it");
            Vec::new()
        }
    }
}

/// The interpreter's process group, killed on `kill` or drop.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pgid) = self.0.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    // the interpreter was spawned into.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
