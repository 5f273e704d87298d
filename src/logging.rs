//! Report output.
//!
//! Diagnostics go through `tracing`. Benchmark reports go through a
//! [`ReportSink`], one line at a time.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::BenchResult;

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "readbench=info";

const BANNER_WIDTH: usize = 60;

/// Destination for report lines. Writes are fire-and-forget.
pub trait ReportSink: Send + Sync {
    fn write_line(&self, line: &str);
}

pub type SharedSink = Arc<dyn ReportSink>;

/// Install the global tracing subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

/// Writes every line to stdout and to a results file.
pub struct TeeSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl TeeSink {
    /// Create (truncating) the results file.
    pub fn create<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Banner with the test name and the local time.
    pub fn write_header(&self, test_name: &str) {
        let rule = "=".repeat(BANNER_WIDTH);
        self.write_line("");
        self.write_line(&rule);
        self.write_line(&format!("TEST: {}", test_name));
        self.write_line(&format!("Date: {}", Local::now().format("%Y-%m-%d %H:%M:%S")));
        self.write_line(&rule);
        self.write_line("");
    }
}

impl ReportSink for TeeSink {
    fn write_line(&self, line: &str) {
        println!("{}", line);
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }
}

/// Forwards report lines as `info` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn write_line(&self, line: &str) {
        if !line.is_empty() {
            tracing::info!("{}", line);
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.lines.lock().iter().filter(|l| l.contains(needle)).count()
    }
}

impl ReportSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Writes to stdout only.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ReportSink for ConsoleSink {
    fn write_line(&self, line: &str) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tee_sink_truncates_and_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results").join("cursor-streaming_results.txt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale content\n").unwrap();

        let sink = TeeSink::create(&path).unwrap();
        sink.write_header("cursor-streaming");
        sink.write_line("records: 42");
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale content"));
        assert!(content.contains("TEST: cursor-streaming"));
        assert!(content.contains("Date: "));
        assert!(content.ends_with("records: 42\n"));
    }

    #[test]
    fn test_memory_sink_shared_across_threads() {
        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || sink.write_line(&format!("worker {}", i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.count_matching("worker"), 4);
        assert!(sink.contains("worker 3"));
    }
}
