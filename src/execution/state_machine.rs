//! Work item lifecycle
//!
//! ```text
//! Pending --Start--> Running --Succeed--> Succeeded
//!                            \--Fail----> Failed
//! ```
//!
//! Terminal states are final; there are no retries. Transitions are pure
//! functions so the worker loop stays easy to test.

use super::types::{ExecutionRecord, ExecutionStatus, WorkItem};
use chrono::{DateTime, Local};

#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Pending {
        item: WorkItem,
    },
    Running {
        item: WorkItem,
        started_at: DateTime<Local>,
    },
    Succeeded {
        item: WorkItem,
        started_at: DateTime<Local>,
        finished_at: DateTime<Local>,
    },
    Failed {
        item: WorkItem,
        started_at: DateTime<Local>,
        finished_at: DateTime<Local>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemTransition {
    Start { at: DateTime<Local> },
    Succeed { at: DateTime<Local> },
    Fail { at: DateTime<Local>, error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid transition from {from} with {transition}")]
    InvalidTransition { from: String, transition: String },
}

impl ItemState {
    pub fn new(item: WorkItem) -> Self {
        ItemState::Pending { item }
    }

    pub fn item(&self) -> &WorkItem {
        match self {
            ItemState::Pending { item }
            | ItemState::Running { item, .. }
            | ItemState::Succeeded { item, .. }
            | ItemState::Failed { item, .. } => item,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Succeeded { .. } | ItemState::Failed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            ItemState::Pending { .. } => "Pending",
            ItemState::Running { .. } => "Running",
            ItemState::Succeeded { .. } => "Succeeded",
            ItemState::Failed { .. } => "Failed",
        }
    }
}

/// Apply a transition, rejecting anything the lifecycle does not allow
pub fn apply_transition(
    state: ItemState,
    transition: ItemTransition,
) -> Result<ItemState, StateError> {
    match (state, transition) {
        (ItemState::Pending { item }, ItemTransition::Start { at }) => Ok(ItemState::Running {
            item,
            started_at: at,
        }),

        (ItemState::Running { item, started_at }, ItemTransition::Succeed { at }) => {
            Ok(ItemState::Succeeded {
                item,
                started_at,
                finished_at: at,
            })
        }

        (ItemState::Running { item, started_at }, ItemTransition::Fail { at, error }) => {
            Ok(ItemState::Failed {
                item,
                started_at,
                finished_at: at,
                error,
            })
        }

        (state, transition) => Err(StateError::InvalidTransition {
            from: format!("{} ({})", state.name(), state.item()),
            transition: format!("{:?}", transition),
        }),
    }
}

/// Execution record of a terminal state; `None` while the item is in flight
pub fn state_to_record(state: &ItemState) -> Option<ExecutionRecord> {
    match state {
        ItemState::Succeeded {
            item,
            started_at,
            finished_at,
        } => Some(ExecutionRecord {
            identifier: item.identifier.clone(),
            procedure: item.procedure.clone(),
            start: *started_at,
            end: *finished_at,
            status: ExecutionStatus::Success,
            error_detail: None,
        }),
        ItemState::Failed {
            item,
            started_at,
            finished_at,
            error,
        } => Some(ExecutionRecord {
            identifier: item.identifier.clone(),
            procedure: item.procedure.clone(),
            start: *started_at,
            end: *finished_at,
            status: ExecutionStatus::Fail,
            error_detail: Some(error.clone()),
        }),
        ItemState::Pending { .. } | ItemState::Running { .. } => None,
    }
}
