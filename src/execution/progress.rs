//! Progress reporting
//!
//! Progress is an observer of the record stream: the log sink feeds every
//! record through a [`ProgressReporter`], which notifies its observers at a
//! fixed cadence and always on the final item. Nothing here can slow down or
//! fail a work item.

use super::types::ExecutionRecord;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::info;

/// Point-in-time view of run progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total: u64,
    pub elapsed: Duration,
    pub estimated_total: Duration,
    pub eta: Duration,
}

impl ProgressSnapshot {
    /// `estimated_total = elapsed * total / completed`, `eta = estimated_total - elapsed`
    pub fn compute(completed: u64, total: u64, elapsed: Duration) -> Self {
        let estimated_total = if completed == 0 {
            elapsed
        } else {
            elapsed.mul_f64(total as f64 / completed as f64)
        };
        Self {
            completed,
            total,
            elapsed,
            estimated_total,
            eta: estimated_total.saturating_sub(elapsed),
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Receives progress notifications
pub trait ProgressObserver: Send {
    /// Called for every completed item
    fn on_item(&mut self, _record: &ExecutionRecord) {}

    /// Called every reporting interval and on the final item
    fn on_progress(&mut self, snapshot: &ProgressSnapshot);

    /// Called once when the record stream ends
    fn on_finish(&mut self, _snapshot: &ProgressSnapshot) {}
}

/// Counts records and fans progress out to observers
pub struct ProgressReporter {
    total: u64,
    interval: u64,
    completed: u64,
    started: Instant,
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl ProgressReporter {
    pub fn new(total: u64, interval: u64) -> Self {
        Self {
            total,
            interval: interval.max(1),
            completed: 0,
            started: Instant::now(),
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::compute(self.completed, self.total, self.started.elapsed())
    }

    pub fn record(&mut self, record: &ExecutionRecord) {
        self.completed += 1;
        for observer in &mut self.observers {
            observer.on_item(record);
        }
        if self.completed % self.interval == 0 || self.completed == self.total {
            let snapshot = self.snapshot();
            for observer in &mut self.observers {
                observer.on_progress(&snapshot);
            }
        }
    }

    pub fn finish(&mut self) {
        let snapshot = self.snapshot();
        for observer in &mut self.observers {
            observer.on_finish(&snapshot);
        }
    }
}

/// Reports progress through `tracing`
#[derive(Debug, Default)]
pub struct LogProgressObserver;

fn round_to_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs_f64().round() as u64)
}

impl ProgressObserver for LogProgressObserver {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        info!(
            completed = snapshot.completed,
            total = snapshot.total,
            "Progress: {}/{} ({:.2}%) | Elapsed: {} | ETA: {}",
            snapshot.completed,
            snapshot.total,
            snapshot.percent(),
            HumanDuration(round_to_secs(snapshot.elapsed)),
            HumanDuration(round_to_secs(snapshot.eta)),
        );
    }
}

/// Terminal progress bar
pub struct TerminalProgressObserver {
    bar: ProgressBar,
    failed: u64,
}

impl TerminalProgressObserver {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) ETA {eta} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar, failed: 0 }
    }

    /// A bar that draws nothing, for tests and non-interactive runs
    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total);
        Self { bar, failed: 0 }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressObserver for TerminalProgressObserver {
    fn on_item(&mut self, record: &ExecutionRecord) {
        if record.is_failure() {
            self.failed += 1;
            self.bar.set_message(format!("{} failed", self.failed));
        }
        self.bar.inc(1);
    }

    fn on_progress(&mut self, _snapshot: &ProgressSnapshot) {}

    fn on_finish(&mut self, snapshot: &ProgressSnapshot) {
        self.bar.finish_with_message(format!(
            "{} items, {} failed, {}",
            snapshot.completed,
            self.failed,
            HumanDuration(snapshot.elapsed)
        ));
    }
}
