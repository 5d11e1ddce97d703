//! Job dispatch and the worker pool
//!
//! A run builds every (identifier, procedure) work item up front, lets a
//! fixed number of workers drain them concurrently, funnels one execution
//! record per item into a single log writer, and folds the records into
//! per-procedure summaries. A failing item never stops the pool.

pub mod dispatcher;
pub mod executor;
pub mod pool;
pub mod progress;
pub mod runner;
pub mod sink;
pub mod state_machine;
pub mod summary;
pub mod types;

pub use dispatcher::{build_work_items, WorkQueue};
pub use executor::{ExtractExecutor, InsertExecutor, ItemError, ItemExecutor, ItemOutcome};
pub use pool::{PoolContext, PoolOutcome, WorkerPool};
pub use progress::{
    LogProgressObserver, ProgressObserver, ProgressReporter, ProgressSnapshot,
    TerminalProgressObserver,
};
pub use runner::{BatchReport, BatchRunner, BatchSettings};
pub use sink::{LogSink, SinkStats};
pub use state_machine::{apply_transition, state_to_record, ItemState, ItemTransition, StateError};
pub use summary::{write_summary, SummaryAggregator};
pub use types::{
    ExecutionRecord, ExecutionStatus, ProcedureSummary, WorkItem, LOG_HEADER, SUMMARY_HEADER,
    TIMESTAMP_FORMAT,
};
