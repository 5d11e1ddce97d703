//! Per-procedure summary aggregation

use super::types::{ExecutionRecord, ProcedureSummary, SUMMARY_HEADER};
use crate::error::{common, ErrorExt, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// The single owner of every procedure's running summary.
///
/// Cloning shares the same map. The lock is held only for the update of one
/// entry, never across a database call.
#[derive(Debug, Clone, Default)]
pub struct SummaryAggregator {
    entries: Arc<Mutex<BTreeMap<String, ProcedureSummary>>>,
}

impl SummaryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProcedureSummary>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, record: &ExecutionRecord) {
        let mut entries = self.lock();
        match entries.get_mut(&record.procedure) {
            Some(summary) => summary.absorb(record),
            None => {
                entries.insert(record.procedure.clone(), ProcedureSummary::from_record(record));
            }
        }
    }

    /// Current summaries sorted by procedure name
    pub fn snapshot(&self) -> Vec<ProcedureSummary> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Write the summary file, one row per procedure in the given order
pub fn write_summary(path: &Path, summaries: &[ProcedureSummary]) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| common::storage_io(path, "create summary file", e))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(SUMMARY_HEADER)?;
    for summary in summaries {
        writer.write_record(summary.to_row())?;
    }
    writer
        .flush()
        .to_storage_error(format!("failed to flush summary file {}", path.display()))?;
    info!(path = %path.display(), procedures = summaries.len(), "Wrote procedure summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::types::ExecutionStatus;
    use chrono::{Duration, Local};
    use tempfile::TempDir;

    fn record(proc: &str, offset: i64, status: ExecutionStatus) -> ExecutionRecord {
        let base = Local::now();
        ExecutionRecord {
            identifier: format!("S{offset}"),
            procedure: proc.to_string(),
            start: base + Duration::seconds(offset),
            end: base + Duration::seconds(offset + 1),
            status,
            error_detail: None,
        }
    }

    #[test]
    fn test_snapshot_is_sorted_by_procedure() {
        let agg = SummaryAggregator::new();
        agg.record(&record("ZETA", 0, ExecutionStatus::Success));
        agg.record(&record("ALPHA", 1, ExecutionStatus::Success));
        agg.record(&record("MID", 2, ExecutionStatus::Fail));

        let names: Vec<_> = agg.snapshot().into_iter().map(|s| s.procedure).collect();
        assert_eq!(names, vec!["ALPHA", "MID", "ZETA"]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_sticky_failure() {
        let agg = SummaryAggregator::new();
        let mut tasks = Vec::new();
        for i in 0..50 {
            let agg = agg.clone();
            tasks.push(tokio::spawn(async move {
                let status = if i == 17 {
                    ExecutionStatus::Fail
                } else {
                    ExecutionStatus::Success
                };
                agg.record(&record("P", i, status));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let snapshot = agg.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, ExecutionStatus::Fail);
    }

    #[test]
    fn test_write_summary_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("PKG_extract_summary.csv");
        let agg = SummaryAggregator::new();
        agg.record(&record("B", 0, ExecutionStatus::Fail));
        agg.record(&record("A", 0, ExecutionStatus::Success));
        write_summary(&path, &agg.snapshot()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "PROCEDURE,EARLIEST_START_TIME,LATEST_END_TIME,EXECUTION_SECONDS,STATUS"
        );
        assert!(lines[1].starts_with("A,"));
        assert!(lines[1].ends_with(",1.000,SUCCESS"));
        assert!(lines[2].ends_with(",FAIL"));
    }
}
