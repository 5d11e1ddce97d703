//! Execution log sink
//!
//! Many workers send records, one consumer owns the CSV file. The header is
//! written and flushed before any worker starts, so even a run cancelled
//! immediately leaves a valid log behind. The consumer flushes whenever the
//! channel runs dry, which keeps the file current while the run progresses.

use super::progress::ProgressReporter;
use super::types::{ExecutionRecord, LOG_HEADER};
use crate::error::{common, BatchError, ErrorCode, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Records in flight between the workers and the log writer
pub const LOG_CHANNEL_CAPACITY: usize = 1000;

/// Totals reported by the sink when it closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub written: u64,
    pub failed_writes: u64,
}

pub struct LogSink {
    path: PathBuf,
    sender: Option<mpsc::Sender<ExecutionRecord>>,
    consumer: JoinHandle<SinkStats>,
}

impl LogSink {
    /// Create the log file, write its header, and start the consumer
    pub fn create(path: &Path, progress: ProgressReporter) -> Result<Self> {
        let file = File::create(path).map_err(|e| common::storage_io(path, "create execution log", e))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(LOG_HEADER)?;
        writer
            .flush()
            .map_err(|e| common::storage_io(path, "write execution log header", e))?;

        let (sender, receiver) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let consumer = tokio::task::spawn_blocking(move || consume(writer, receiver, progress));
        debug!(path = %path.display(), "Opened execution log");

        Ok(Self {
            path: path.to_path_buf(),
            sender: Some(sender),
            consumer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A producer handle for one worker
    pub fn sender(&self) -> Option<mpsc::Sender<ExecutionRecord>> {
        self.sender.clone()
    }

    /// Drop the sink's own sender and wait for the consumer to drain.
    ///
    /// Completes once every other sender has been dropped too.
    pub async fn close(mut self) -> Result<SinkStats> {
        self.sender.take();
        self.consumer.await.map_err(|e| {
            BatchError::execution_with_code(
                ErrorCode::EXEC_LOG_SINK_FAILED,
                format!("execution log writer stopped unexpectedly: {}", e),
            )
        })
    }
}

fn consume(
    mut writer: csv::Writer<File>,
    mut receiver: mpsc::Receiver<ExecutionRecord>,
    mut progress: ProgressReporter,
) -> SinkStats {
    let mut stats = SinkStats::default();

    while let Some(record) = receiver.blocking_recv() {
        write_record(&mut writer, &mut progress, &mut stats, record);
        while let Ok(record) = receiver.try_recv() {
            write_record(&mut writer, &mut progress, &mut stats, record);
        }
        if let Err(e) = writer.flush() {
            warn!(error = %e, "Failed to flush execution log");
        }
    }

    progress.finish();
    stats
}

fn write_record(
    writer: &mut csv::Writer<File>,
    progress: &mut ProgressReporter,
    stats: &mut SinkStats,
    record: ExecutionRecord,
) {
    match writer.write_record(record.to_log_row()) {
        Ok(()) => stats.written += 1,
        Err(e) => {
            stats.failed_writes += 1;
            warn!(
                error = %e,
                procedure = %record.procedure,
                sol_id = %record.identifier,
                "Failed to write log record"
            );
        }
    }
    progress.record(&record);
}
