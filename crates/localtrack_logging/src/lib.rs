//! Shared logging setup for the localtrack binaries.
//!
//! Both processes log to stderr and to a size-rotated file under the scratch
//! directory, so a long-running daemon keeps a bounded on-disk history.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by the api and daemon binaries.
pub struct LogConfig<'a> {
    /// Base name of the log file, e.g. `localtrack-daemon`.
    pub app_name: &'a str,
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `debug`.
    pub level: &'a str,
    /// Directory for log files; created if missing.
    pub log_dir: PathBuf,
}

/// Initialize tracing with a rotating file writer plus stderr output.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;

    let file_writer = RotatingWriter::open(&config.log_dir, config.app_name)
        .context("Failed to open rotating log writer")?;

    let default_filter = format!("localtrack={0},localtrack_api={0},localtrack_daemon={0}", config.level);
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(stderr_filter),
        )
        .init();

    Ok(())
}

struct RotatingFile {
    dir: PathBuf,
    base_name: String,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, base_name: &str) -> io::Result<Self> {
        let base_name = sanitize_name(base_name);
        let (file, written) = Self::append_to(&Self::live_path(dir, &base_name))?;
        let mut rotating = Self {
            dir: dir.to_path_buf(),
            base_name,
            file,
            written,
        };
        if rotating.written > MAX_LOG_FILE_SIZE {
            rotating.rotate()?;
        }
        Ok(rotating)
    }

    fn append_to(path: &Path) -> io::Result<(File, u64)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn live_path(dir: &Path, base_name: &str) -> PathBuf {
        dir.join(format!("{base_name}.log"))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{index}", self.base_name))
    }

    /// Shift `name.log` -> `name.log.1` -> ... and start a fresh live file.
    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.rotated_path(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..MAX_LOG_FILES - 1).rev() {
            let src = self.rotated_path(index);
            if src.exists() {
                fs::rename(&src, self.rotated_path(index + 1))?;
            }
        }
        let live = Self::live_path(&self.dir, &self.base_name);
        if live.exists() {
            fs::rename(&live, self.rotated_path(1))?;
        }

        let (file, written) = Self::append_to(&live)?;
        self.file = file;
        self.written = written;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Clonable handle usable as a tracing `MakeWriter`.
#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, base_name: &str) -> Result<Self> {
        let file = RotatingFile::open(dir, base_name)
            .with_context(|| format!("Failed to open log file for {base_name}"))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        inner.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_to_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RotatingWriter::open(dir.path(), "test-app").unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(dir.path().join("test-app.log")).unwrap();
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RotatingFile::open(dir.path(), "spin").unwrap();
        // Force the live file over the limit, then write again.
        file.written = MAX_LOG_FILE_SIZE;
        file.write_all(b"next\n").unwrap();
        file.flush().unwrap();

        assert!(dir.path().join("spin.log.1").exists());
        let live = fs::read_to_string(dir.path().join("spin.log")).unwrap();
        assert_eq!(live, "next\n");
    }

    #[test]
    fn sanitizes_odd_names() {
        assert_eq!(sanitize_name("api server/1"), "api_server_1");
    }
}
