//! Logging init: file under the XDG state dir, or stderr when that fails.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,s3xfer=debug,s3xfer_core=debug";

/// Where log lines end up after `init_logging` / `init_logging_stderr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

/// Writer handed out per event: the shared log file, or stderr if the
/// handle could not be cloned.
enum LogWriter {
    File(fs::File),
    Stderr,
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::File(f) => f.write(buf),
            LogWriter::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::File(f) => f.flush(),
            LogWriter::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct SharedFile(fs::File);

impl<'a> MakeWriter<'a> for SharedFile {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(LogWriter::File)
            .unwrap_or(LogWriter::Stderr)
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Path of the log file: `~/.local/state/s3xfer/s3xfer.log`.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("s3xfer")?;
    Ok(xdg_dirs.get_state_home().join("s3xfer.log"))
}

/// Initialize structured logging to the XDG state log file.
/// Returns Err (without installing anything) if the file cannot be opened,
/// so the caller can fall back to [`init_logging_stderr`].
pub fn init_logging() -> Result<LogTarget> {
    let path = log_file_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(BoxMakeWriter::new(SharedFile(file)))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?;

    tracing::info!("s3xfer logging initialized at {}", path.display());
    Ok(LogTarget::File(path))
}

/// Initialize logging to stderr only. Safe to call when a subscriber is
/// already installed (the second install is ignored).
pub fn init_logging_stderr() -> LogTarget {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
    LogTarget::Stderr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_lives_under_s3xfer_state_dir() {
        if let Ok(path) = log_file_path() {
            assert_eq!(path.file_name().unwrap(), "s3xfer.log");
            assert!(path.to_string_lossy().contains("s3xfer"));
        }
    }

    #[test]
    fn stderr_init_is_idempotent() {
        assert_eq!(init_logging_stderr(), LogTarget::Stderr);
        assert_eq!(init_logging_stderr(), LogTarget::Stderr);
    }
}
