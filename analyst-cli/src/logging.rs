//! Tracing setup for the binary
//!
//! Events go to stderr, and optionally to a per-run file named
//! `<YYYYmmdd_HHMMSS>_<8 hex>.log` inside the log directory.

use analyst_error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// `<YYYYmmdd_HHMMSS>_<first 8 hex of a v4 uuid>.log`
pub fn log_file_name() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}.log", stamp, &id[..8])
}

fn open_log_file(dir: &Path) -> Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir).map_err(|e| {
        Error::from(e)
            .with_operation("logging::create_dir")
            .with_context("path", dir.display().to_string())
    })?;
    let path = dir.join(log_file_name());
    let file = File::create(&path).map_err(|e| {
        Error::from(e)
            .with_operation("logging::create_file")
            .with_context("path", path.display().to_string())
    })?;
    Ok((file, path))
}

fn file_layer<S>(file: Option<File>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    file.map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
    })
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// Returns the path of the run log when `log_dir` is given. If the run log
/// cannot be opened the stderr subscriber is still installed before the
/// error is returned.
pub fn init_logging(json: bool, level: Level, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (file, path, failure) = match log_dir.map(open_log_file).transpose() {
        Ok(Some((file, path))) => (Some(file), Some(path), None),
        Ok(None) => (None, None, None),
        Err(e) => (None, None, Some(e)),
    };

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .with(file_layer(file))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(file_layer(file))
            .try_init()
            .ok();
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(path),
    }
}
