//! Work item dispatch
//!
//! The full identifier x procedure cross-product is built before any worker
//! starts, so the total is known for progress reporting. The queue is filled
//! once and then only drained; producers never block.

use super::types::WorkItem;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every (identifier, procedure) pair, identifier-major
pub fn build_work_items(identifiers: &[String], procedures: &[String]) -> Vec<WorkItem> {
    identifiers
        .iter()
        .flat_map(|id| procedures.iter().map(move |proc| WorkItem::new(id.clone(), proc.clone())))
        .collect()
}

/// Pre-filled, closed queue shared by the workers
#[derive(Debug)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    total: usize,
    cancel: CancellationToken,
}

impl WorkQueue {
    /// Build the cross-product and enqueue it
    pub fn dispatch(
        identifiers: &[String],
        procedures: &[String],
        cancel: CancellationToken,
    ) -> Self {
        let items = build_work_items(identifiers, procedures);
        info!(
            total = items.len(),
            identifiers = identifiers.len(),
            procedures = procedures.len(),
            "Populated work item queue"
        );
        Self::from_items(items, cancel)
    }

    pub fn from_items(items: Vec<WorkItem>, cancel: CancellationToken) -> Self {
        Self {
            total: items.len(),
            items: Mutex::new(items.into()),
            cancel,
        }
    }

    /// Next item, or `None` once the queue is drained or the run is cancelled
    pub fn next(&self) -> Option<WorkItem> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Items never handed to a worker
    pub fn remaining(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
