//! Batch runner
//!
//! Wires the pieces of one run together: prepare statements, open the log
//! sink, run the worker pool, persist the summary, merge spool files. The
//! statement cache is released on every path out of [`BatchRunner::run`].

use super::dispatcher::WorkQueue;
use super::executor::{ExtractExecutor, InsertExecutor, ItemExecutor};
use super::pool::{PoolContext, WorkerPool};
use super::progress::{LogProgressObserver, ProgressObserver, ProgressReporter};
use super::sink::LogSink;
use super::summary::{write_summary, SummaryAggregator};
use crate::config::{AppConfig, RunConfig, RunMode, TemplateSet};
use crate::db::Database;
use crate::error::{common, BatchError, ErrorCode, Result};
use crate::format::RowFormatter;
use crate::merge::{MergeErrorPolicy, MergeReport, MergeStage};
use crate::resources::BufferPool;
use crate::spool::{ensure_unambiguous_names, SpoolWriter};
use crate::statements::{plan_statements, StatementCache};
use indicatif::HumanDuration;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything a run needs besides the database and its inputs
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub mode: RunMode,
    pub package: String,
    pub procedures: Vec<String>,
    pub identifier_column: String,
    pub concurrency: usize,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
    pub spool_dir: PathBuf,
    pub formatter: RowFormatter,
    pub merge_policy: MergeErrorPolicy,
    pub progress_interval: u64,
    pub run_timeout: Option<Duration>,
}

impl BatchSettings {
    pub fn from_configs(app: &AppConfig, run: &RunConfig, mode: RunMode) -> Self {
        let (log_path, summary_path) = run.log_file_paths(&app.log_file_path, mode);
        Self {
            mode,
            package: run.package_name.clone(),
            procedures: run.procedures.clone(),
            identifier_column: run.identifier_column.clone(),
            concurrency: app.concurrency,
            log_path,
            summary_path,
            spool_dir: run.spool_output_path.clone(),
            formatter: run.row_formatter(),
            merge_policy: run.merge_error_policy,
            progress_interval: run.progress_interval,
            run_timeout: app.run_timeout,
        }
    }
}

/// What a finished (or cancelled) run did
#[derive(Debug)]
pub struct BatchReport {
    pub mode: RunMode,
    pub identifiers: usize,
    pub procedures: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Cut short by cancellation, no record written
    pub abandoned: usize,
    /// Never handed to a worker
    pub not_started: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
    pub merges: Vec<MergeReport>,
    pub merge_errors: Vec<BatchError>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.merge_errors.is_empty()
    }
}

pub struct BatchRunner {
    db: Arc<dyn Database>,
    settings: BatchSettings,
    cancel: CancellationToken,
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl BatchRunner {
    pub fn new(db: Arc<dyn Database>, settings: BatchSettings) -> Self {
        Self {
            db,
            settings,
            cancel: CancellationToken::new(),
            observers: Vec::new(),
        }
    }

    /// Use an externally owned cancellation token (Ctrl-C, tests)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Add a progress observer next to the built-in log observer
    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Execute the whole batch.
    ///
    /// Setup failures (directories, templates, statement preparation, log
    /// file) abort before any item runs. Item failures only show up in the
    /// log, the summary and the report.
    pub async fn run(
        mut self,
        identifiers: Vec<String>,
        templates: TemplateSet,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let observers = std::mem::take(&mut self.observers);
        let settings = &self.settings;

        if settings.mode == RunMode::Extract {
            ensure_unambiguous_names(&settings.procedures, &identifiers)?;
        }
        for path in [&settings.log_path, &settings.summary_path] {
            if let Some(dir) = path.parent() {
                create_dir(dir).await?;
            }
        }
        if settings.mode == RunMode::Extract {
            create_dir(&settings.spool_dir).await?;
        }

        let plans = plan_statements(
            self.db.dialect(),
            settings.mode,
            &settings.procedures,
            &settings.package,
            &templates,
            &settings.identifier_column,
        )?;
        let statements = Arc::new(
            StatementCache::prepare_all(self.db.as_ref(), settings.mode, &settings.package, &plans)
                .await?,
        );

        let result = self
            .execute(statements.clone(), identifiers, templates, observers, start)
            .await;
        statements.close_all().await;
        result
    }

    async fn execute(
        &self,
        statements: Arc<StatementCache>,
        identifiers: Vec<String>,
        templates: TemplateSet,
        observers: Vec<Box<dyn ProgressObserver>>,
        start: Instant,
    ) -> Result<BatchReport> {
        let settings = &self.settings;
        let queue = Arc::new(WorkQueue::dispatch(
            &identifiers,
            &settings.procedures,
            self.cancel.clone(),
        ));
        let total = queue.total();

        let mut reporter = ProgressReporter::new(total as u64, settings.progress_interval)
            .with_observer(Box::new(LogProgressObserver));
        for observer in observers {
            reporter.add_observer(observer);
        }
        let sink = LogSink::create(&settings.log_path, reporter)?;
        let records = sink.sender().ok_or_else(|| {
            BatchError::execution_with_code(ErrorCode::EXEC_LOG_SINK_FAILED, "execution log is closed")
        })?;

        let executor: Arc<dyn ItemExecutor> = match settings.mode {
            RunMode::Extract => Arc::new(ExtractExecutor::new(
                statements,
                Arc::new(templates),
                SpoolWriter::new(
                    &settings.spool_dir,
                    settings.formatter.clone(),
                    BufferPool::new(settings.concurrency * 2, 512),
                ),
            )),
            RunMode::Insert => Arc::new(InsertExecutor::new(statements)),
        };

        let summaries = SummaryAggregator::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let deadline = settings
            .run_timeout
            .map(|timeout| spawn_deadline(timeout, self.cancel.clone(), completed.clone()));

        let ctx = PoolContext {
            executor,
            records,
            summaries: summaries.clone(),
            completed: completed.clone(),
            cancel: self.cancel.clone(),
        };
        let outcome = WorkerPool::new(settings.concurrency).run(queue.clone(), ctx).await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let sink_stats = sink.close().await?;
        if sink_stats.failed_writes > 0 {
            warn!(failed = sink_stats.failed_writes, "Some execution records could not be written");
        }
        write_summary(&settings.summary_path, &summaries.snapshot())?;

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!(
                completed = completed.load(Ordering::SeqCst),
                abandoned = outcome.abandoned,
                not_started = queue.remaining(),
                "Run cancelled; log and summary cover completed items only"
            );
        }

        let (merges, merge_errors) = self.merge(cancelled).await;
        let report = BatchReport {
            mode: settings.mode,
            identifiers: identifiers.len(),
            procedures: settings.procedures.len(),
            total,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            abandoned: outcome.abandoned,
            not_started: queue.remaining(),
            cancelled,
            elapsed: start.elapsed(),
            log_path: settings.log_path.clone(),
            summary_path: settings.summary_path.clone(),
            merges,
            merge_errors,
        };
        info!(
            "All done! Processed {} SOLs across {} procedures in {}",
            report.identifiers,
            report.procedures,
            HumanDuration(report.elapsed)
        );
        Ok(report)
    }

    async fn merge(&self, cancelled: bool) -> (Vec<MergeReport>, Vec<BatchError>) {
        let settings = &self.settings;
        if settings.mode != RunMode::Extract {
            return (Vec::new(), Vec::new());
        }
        if cancelled {
            warn!("Skipping merge after cancellation; spool files are kept");
            return (Vec::new(), Vec::new());
        }

        let stage = MergeStage::new(
            &settings.spool_dir,
            settings.procedures.clone(),
            settings.merge_policy,
        );
        let mut merges = Vec::new();
        let mut errors = Vec::new();
        for result in stage.merge_all().await {
            match result {
                Ok(report) => merges.push(report),
                Err(e) => {
                    error!(error = %e, "Merge failed");
                    errors.push(e);
                }
            }
        }
        (merges, errors)
    }
}

async fn create_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| common::storage_io(dir, "create directory", e))
}

fn spawn_deadline(
    timeout: Duration,
    cancel: CancellationToken,
    completed: Arc<AtomicUsize>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    timeout = %HumanDuration(timeout),
                    completed = completed.load(Ordering::SeqCst),
                    "Run timeout elapsed, cancelling"
                );
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}
