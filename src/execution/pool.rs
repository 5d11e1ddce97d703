//! Worker pool
//!
//! Exactly `worker_count` tasks drain the shared [`WorkQueue`]. Each worker
//! owns nothing but handles passed in through [`PoolContext`]: the executor,
//! a sender into the log sink, the summary aggregator and the completion
//! counter. Workers never talk to each other.

use super::dispatcher::WorkQueue;
use super::executor::{ItemError, ItemExecutor};
use super::state_machine::{apply_transition, state_to_record, ItemState, ItemTransition};
use super::summary::SummaryAggregator;
use super::types::{ExecutionRecord, WorkItem};
use chrono::Local;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared handles given to every worker
#[derive(Clone)]
pub struct PoolContext {
    pub executor: Arc<dyn ItemExecutor>,
    pub records: mpsc::Sender<ExecutionRecord>,
    pub summaries: SummaryAggregator,
    pub completed: Arc<AtomicUsize>,
    pub cancel: CancellationToken,
}

/// Item counts once every worker has returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// In flight when the run was cancelled; no record was produced
    pub abandoned: usize,
    /// Worker tasks that died outside item execution
    pub worker_panics: usize,
}

impl PoolOutcome {
    fn absorb(&mut self, other: PoolOutcome) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
        self.worker_panics += other.worker_panics;
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Fixed-size pool of concurrent workers
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run until the queue is drained or the run is cancelled.
    ///
    /// Returns only after every worker has finished, so the caller may close
    /// the sink and merge spool files afterwards.
    pub async fn run(&self, queue: Arc<WorkQueue>, ctx: PoolContext) -> PoolOutcome {
        info!(workers = self.worker_count, items = queue.total(), "Starting workers");
        let mut workers = JoinSet::new();
        for worker in 0..self.worker_count {
            workers.spawn(run_worker(worker, queue.clone(), ctx.clone()));
        }
        // Only the workers may keep the log channel open.
        drop(ctx);

        let mut outcome = PoolOutcome::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(stats) => outcome.absorb(stats),
                Err(e) => {
                    error!(error = %e, "Worker task terminated abnormally");
                    outcome.worker_panics += 1;
                }
            }
        }
        debug!(?outcome, "All workers finished");
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_worker(worker: usize, queue: Arc<WorkQueue>, ctx: PoolContext) -> PoolOutcome {
    let mut stats = PoolOutcome::default();

    while let Some(item) = queue.next() {
        match execute_item(worker, &item, &ctx).await {
            Some(record) => {
                if record.is_failure() {
                    stats.failed += 1;
                } else {
                    stats.succeeded += 1;
                }
                ctx.summaries.record(&record);
                if ctx.records.send(record).await.is_err() {
                    warn!(worker, procedure = %item.procedure, sol_id = %item.identifier, "Execution log closed, record dropped");
                }
                ctx.completed.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                stats.abandoned += 1;
                break;
            }
        }
    }

    debug!(worker, ?stats, "Worker finished");
    stats
}

/// Drive one item through its lifecycle. `None` means it was cancelled.
async fn execute_item(worker: usize, item: &WorkItem, ctx: &PoolContext) -> Option<ExecutionRecord> {
    let state = ItemState::new(item.clone());
    let state = match apply_transition(state, ItemTransition::Start { at: Local::now() }) {
        Ok(state) => state,
        Err(e) => {
            error!(worker, error = %e, "Work item could not start");
            return None;
        }
    };
    debug!(worker, procedure = %item.procedure, sol_id = %item.identifier, "Executing work item");

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        result = AssertUnwindSafe(ctx.executor.execute(item)).catch_unwind() => Some(result),
    };

    let transition = match result {
        None => {
            debug!(worker, procedure = %item.procedure, sol_id = %item.identifier, "Work item abandoned");
            ctx.executor.abandon(item).await;
            return None;
        }
        Some(Ok(Ok(outcome))) => {
            debug!(worker, procedure = %item.procedure, sol_id = %item.identifier, rows = outcome.rows, "Work item succeeded");
            ItemTransition::Succeed { at: Local::now() }
        }
        Some(Ok(Err(e))) => {
            error!(worker, procedure = %item.procedure, sol_id = %item.identifier, error = %e, "Work item failed");
            ItemTransition::Fail {
                at: Local::now(),
                error: e.to_string(),
            }
        }
        Some(Err(panic)) => {
            let e = ItemError::Panicked(panic_message(panic.as_ref()));
            error!(worker, procedure = %item.procedure, sol_id = %item.identifier, error = %e, "Work item panicked");
            ItemTransition::Fail {
                at: Local::now(),
                error: e.to_string(),
            }
        }
    };

    match apply_transition(state, transition) {
        Ok(state) => state_to_record(&state),
        Err(e) => {
            error!(worker, error = %e, "Work item reached an invalid state");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::executor::ItemOutcome;
    use crate::execution::types::ExecutionStatus;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails items whose identifier is listed; tracks concurrency
    struct ScriptedExecutor {
        failing: HashSet<String>,
        panicking: HashSet<String>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        abandoned: Mutex<Vec<WorkItem>>,
    }

    impl ScriptedExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                failing: HashSet::new(),
                panicking: HashSet::new(),
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                abandoned: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ItemExecutor for ScriptedExecutor {
        async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.panicking.contains(&item.identifier) {
                panic!("corrupt row for {}", item.identifier);
            }
            if self.failing.contains(&item.identifier) {
                return Err(ItemError::MissingStatement(item.procedure.clone()));
            }
            Ok(ItemOutcome { rows: 1 })
        }

        async fn abandon(&self, item: &WorkItem) {
            self.abandoned.lock().unwrap().push(item.clone());
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:03}")).collect()
    }

    async fn run(
        executor: Arc<ScriptedExecutor>,
        identifiers: &[String],
        procedures: &[String],
        workers: usize,
        cancel: CancellationToken,
    ) -> (PoolOutcome, Vec<ExecutionRecord>, SummaryAggregator) {
        let queue = Arc::new(WorkQueue::dispatch(identifiers, procedures, cancel.clone()));
        let (tx, mut rx) = mpsc::channel(16);
        let summaries = SummaryAggregator::new();
        let ctx = PoolContext {
            executor,
            records: tx,
            summaries: summaries.clone(),
            completed: Arc::new(AtomicUsize::new(0)),
            cancel,
        };
        let collector = tokio::spawn(async move {
            let mut records = Vec::new();
            while let Some(r) = rx.recv().await {
                records.push(r);
            }
            records
        });
        let outcome = WorkerPool::new(workers).run(queue, ctx).await;
        let records = collector.await.unwrap();
        (outcome, records, summaries)
    }

    #[tokio::test]
    async fn test_every_item_yields_exactly_one_record() {
        let mut exec = ScriptedExecutor::new(Duration::from_millis(1));
        exec.failing.insert("003".to_string());
        let procs = vec!["A".to_string(), "B".to_string()];
        let (outcome, records, summaries) =
            run(Arc::new(exec), &ids(10), &procs, 4, CancellationToken::new()).await;

        assert_eq!(records.len(), 20);
        let unique: HashSet<_> = records
            .iter()
            .map(|r| (r.identifier.clone(), r.procedure.clone()))
            .collect();
        assert_eq!(unique.len(), 20);
        for r in &records {
            assert_eq!(r.is_failure(), r.identifier == "003");
        }
        assert_eq!(outcome.succeeded, 18);
        assert_eq!(outcome.failed, 2);

        let statuses: HashMap<_, _> = summaries
            .snapshot()
            .into_iter()
            .map(|s| (s.procedure, s.status))
            .collect();
        assert_eq!(statuses["A"], ExecutionStatus::Fail);
        assert_eq!(statuses["B"], ExecutionStatus::Fail);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let exec = Arc::new(ScriptedExecutor::new(Duration::from_millis(5)));
        let (outcome, _, _) = run(
            exec.clone(),
            &ids(30),
            &["P".to_string()],
            3,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome.completed(), 30);
        assert!(exec.peak.load(Ordering::SeqCst) <= 3);
        assert!(exec.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panicking_item_is_recorded_as_failure() {
        let mut exec = ScriptedExecutor::new(Duration::ZERO);
        exec.panicking.insert("001".to_string());
        let (outcome, records, _) = run(
            Arc::new(exec),
            &ids(3),
            &["P".to_string()],
            2,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.worker_panics, 0);
        let failed = records.iter().find(|r| r.is_failure()).unwrap();
        assert!(failed
            .error_detail
            .as_deref()
            .unwrap()
            .contains("corrupt row for 001"));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_in_flight_items() {
        let exec = Arc::new(ScriptedExecutor::new(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let (outcome, records, summaries) =
            run(exec.clone(), &ids(10), &["P".to_string()], 2, cancel).await;

        assert!(records.is_empty());
        assert!(summaries.is_empty());
        assert_eq!(outcome.abandoned, 2);
        assert_eq!(exec.abandoned.lock().unwrap().len(), 2);
    }
}
