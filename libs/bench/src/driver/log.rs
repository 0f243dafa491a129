//! Append-only result log.
//!
//! Workers never touch the log file. They send entries through an MPSC
//! channel to a single consumer that owns the file:
//! - LogWriter - cloneable handle for sending entries
//! - LogWriterConfig - configuration
//! - LogConsumer - serializes each entry to one JSON line and appends it
//!
//! ```text
//! ┌──────────┐
//! │ worker 0 │──┐
//! └──────────┘  │   MPSC    ┌─────────────┐    append    ┌───────────────────┐
//! ┌──────────┐  ├──────────▶│ LogConsumer │─────────────▶│ recall_data.jsonl │
//! │ worker n │──┘           └─────────────┘              └───────────────────┘
//! └──────────┘
//! ```
//!
//! Every entry is written with a single `write_all` of a complete line, so
//! lines never interleave. The file is opened in append mode and never
//! truncated: consecutive runs accumulate in the same log, and a run killed
//! midway leaves every entry written up to that point intact.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::identifier::BenchmarkId;

/// Name of the result log inside a provider's report directory.
pub const RESULT_LOG_FILE: &str = "recall_data.jsonl";

// ============================================================================
// Entries
// ============================================================================

/// One executed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultLogEntry {
    pub benchmark_id: BenchmarkId,
    /// Worker that issued the query
    pub worker: u32,
    /// Position in the worker's issuance order
    pub sequence: u32,
    /// Index of the query record in the augmented dataset
    pub query_index: u64,
    pub query_vector_id: u64,
    /// Whether a filter was sent with the query
    pub filtered: bool,
    pub k: u32,
    /// Wall-clock time the search call took
    pub latency_ms: f64,
    /// Unix epoch milliseconds when the search call returned
    pub finished_at_ms: i64,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

/// Result of a search call. A failed call is never an empty success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Success {
        /// Returned ids, nearest first
        returned_ids: Vec<u64>,
        payload_present: bool,
    },
    Failed {
        error: String,
    },
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success { .. })
    }
}

// ============================================================================
// LogWriterConfig
// ============================================================================

/// Configuration for the result log writer.
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    /// Size of the MPSC channel buffer
    pub channel_buffer_size: usize,
}

impl Default for LogWriterConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
        }
    }
}

// ============================================================================
// LogWriter
// ============================================================================

/// Synchronization marker; completed once every entry sent before it is on disk.
#[derive(Debug)]
pub struct FlushMarker(oneshot::Sender<()>);

impl FlushMarker {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn complete(self) {
        let _ = self.0.send(());
    }
}

#[derive(Debug)]
pub enum LogMessage {
    Entry(Box<ResultLogEntry>),
    Flush(FlushMarker),
}

/// Handle for sending result entries to the log consumer.
#[derive(Clone)]
pub struct LogWriter {
    sender: mpsc::Sender<LogMessage>,
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("sender", &"<mpsc::Sender>")
            .finish()
    }
}

impl LogWriter {
    pub fn new(sender: mpsc::Sender<LogMessage>) -> Self {
        Self { sender }
    }

    /// Enqueue an entry; returns once it is in the channel, not on disk.
    pub async fn send(&self, entry: ResultLogEntry) -> Result<()> {
        self.sender
            .send(LogMessage::Entry(Box::new(entry)))
            .await
            .context("Failed to send entry to result log - consumer gone")
    }

    /// Wait until every entry sent before this call is written and flushed.
    pub async fn flush(&self) -> Result<()> {
        let (marker, rx) = FlushMarker::new();
        self.sender
            .send(LogMessage::Flush(marker))
            .await
            .context("Failed to send flush marker - channel closed")?;
        rx.await
            .context("Flush failed - consumer dropped completion channel")?;
        Ok(())
    }

    /// Check if the consumer is still running
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Create a new log writer and receiver pair.
pub fn create_log_writer(config: &LogWriterConfig) -> (LogWriter, mpsc::Receiver<LogMessage>) {
    let (sender, receiver) = mpsc::channel(config.channel_buffer_size);
    (LogWriter::new(sender), receiver)
}

// ============================================================================
// LogConsumer
// ============================================================================

/// Single owner of the result log file.
pub struct LogConsumer {
    receiver: mpsc::Receiver<LogMessage>,
    path: PathBuf,
    file: File,
    written: u64,
}

impl LogConsumer {
    /// Open (or create) `path` for appending.
    pub async fn open(receiver: mpsc::Receiver<LogMessage>, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open result log {}", path.display()))?;
        Ok(Self {
            receiver,
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Write entries until every writer is dropped; returns the entry count.
    #[tracing::instrument(skip(self), name = "result_log_consumer", fields(path = %self.path.display()))]
    pub async fn run(mut self) -> Result<u64> {
        tracing::debug!("Starting result log consumer");

        while let Some(message) = self.receiver.recv().await {
            match message {
                LogMessage::Entry(entry) => self.append(&entry).await?,
                LogMessage::Flush(marker) => {
                    self.file
                        .flush()
                        .await
                        .context("Failed to flush result log")?;
                    marker.complete();
                }
            }
        }

        self.file
            .flush()
            .await
            .context("Failed to flush result log")?;
        tracing::info!(entries = self.written, "Result log consumer shutting down - channel closed");
        Ok(self.written)
    }

    async fn append(&mut self, entry: &ResultLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry).context("Failed to serialize result entry")?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }
}

/// Spawn a log consumer as a tokio task.
///
/// Returns a JoinHandle that resolves with the number of entries written
/// once every [`LogWriter`] clone has been dropped.
pub fn spawn_log_consumer(consumer: LogConsumer) -> tokio::task::JoinHandle<Result<u64>> {
    tokio::spawn(consumer.run())
}

/// Open `path` and spawn its consumer; the usual way to get a log writer.
pub async fn open_result_log(
    path: &Path,
    config: &LogWriterConfig,
) -> Result<(LogWriter, tokio::task::JoinHandle<Result<u64>>)> {
    let (writer, receiver) = create_log_writer(config);
    let consumer = LogConsumer::open(receiver, path).await?;
    Ok((writer, spawn_log_consumer(consumer)))
}
