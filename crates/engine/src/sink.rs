//! Output sinks
//!
//! All workers share one sink. Every [`OutputSink::append`] writes a complete record under the
//! sink's own lock, so records never interleave.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Destination could not be opened, written or flushed
    #[error("failed to write to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking write never reported back
    #[error("sink write was interrupted: {0}")]
    Interrupted(String),
}

/// Append-only destination shared by all workers
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Append one record as a single line
    async fn append(&self, record: &str) -> Result<(), SinkError>;
}

/// Appends records to a file
///
/// Each append opens the file in append mode, writes the line, flushes and closes it again. The
/// whole sequence runs on a blocking thread while holding the sink lock, so dropping the caller's
/// future mid-append cannot leave a partial line behind.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl FileSink {
    /// Append to `path`, keeping whatever it already holds
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create or truncate `path`, then append to it
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        tokio::fs::File::create(&path)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "Output truncated");
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn append(&self, record: &str) -> Result<(), SinkError> {
        let path = Arc::clone(&self.path);
        let lock = Arc::clone(&self.lock);
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock();
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_path())?;
            file.write_all(line.as_bytes())?;
            file.flush()
        })
        .await
        .map_err(|e| SinkError::Interrupted(e.to_string()))?
        .map_err(|source| SinkError::Io {
            path: self.path.to_path_buf(),
            source,
        })
    }
}

/// Keeps records in memory
///
/// Useful when embedding the engine or asserting on output in tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<String>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in append order
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl OutputSink for InMemorySink {
    async fn append(&self, record: &str) -> Result<(), SinkError> {
        self.records.lock().push(record.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = FileSink::create(&path).await.unwrap();

        sink.append("first").await.unwrap();
        sink.append("second").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_create_truncates_but_new_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "stale\n").unwrap();

        let appending = FileSink::new(&path);
        appending.append("kept").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "stale\nkept\n");

        let fresh = FileSink::create(&path).await.unwrap();
        fresh.append("only").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "only\n");
    }

    #[tokio::test]
    async fn test_unwritable_destination_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let sink = FileSink::new(dir.path());

        let err = sink.append("lost").await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_appends_never_interleave() {
        const WRITERS: usize = 8;
        const RECORDS: usize = 200;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = FileSink::create(&path).await.unwrap();

        let mut handles = Vec::new();
        for writer in 0..WRITERS {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                // Long records make torn writes easy to spot
                let filler = format!("{}", writer).repeat(512);
                for n in 0..RECORDS {
                    sink.append(&format!("writer={} n={} {}", writer, n, filler))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), WRITERS * RECORDS);

        for line in lines {
            let mut parts = line.splitn(3, ' ');
            let writer = parts.next().unwrap().strip_prefix("writer=").unwrap();
            let _n = parts.next().unwrap();
            let filler = parts.next().unwrap();
            assert_eq!(filler, writer.repeat(512), "torn record: {}", line);
        }
    }

    #[tokio::test]
    async fn test_in_memory_sink() {
        let sink = InMemorySink::new();
        assert!(sink.is_empty());

        sink.append("a").await.unwrap();
        sink.append("b").await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records(), vec!["a", "b"]);
    }
}
