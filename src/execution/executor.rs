//! Per-item execution
//!
//! An executor runs one work item against its prepared statement. Any error
//! ends that item only; the worker turns it into a FAIL record and moves on.

use super::types::WorkItem;
use crate::config::TemplateSet;
use crate::db::DbError;
use crate::spool::{SpoolError, SpoolWriter};
use crate::statements::StatementCache;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("no prepared statement for procedure {0}")]
    MissingStatement(String),
    #[error("missing template for procedure {0}")]
    MissingTemplate(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Spool(#[from] SpoolError),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// What a successful item produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Rows spooled (extract) or reported affected (insert)
    pub rows: u64,
}

#[async_trait]
pub trait ItemExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome, ItemError>;

    /// Clean up after an item whose execution was cut short by cancellation
    async fn abandon(&self, _item: &WorkItem) {}
}

/// Runs the extract query and spools its rows
pub struct ExtractExecutor {
    statements: Arc<StatementCache>,
    templates: Arc<TemplateSet>,
    spool: SpoolWriter,
}

impl ExtractExecutor {
    pub fn new(
        statements: Arc<StatementCache>,
        templates: Arc<TemplateSet>,
        spool: SpoolWriter,
    ) -> Self {
        Self {
            statements,
            templates,
            spool,
        }
    }
}

#[async_trait]
impl ItemExecutor for ExtractExecutor {
    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
        let stmt = self
            .statements
            .statement_for(&item.procedure)
            .ok_or_else(|| ItemError::MissingStatement(item.procedure.clone()))?;
        let columns = self
            .templates
            .get(&item.procedure)
            .ok_or_else(|| ItemError::MissingTemplate(item.procedure.clone()))?;

        let rows = stmt.query(&[item.identifier.as_str()]).await?;
        let rows = self
            .spool
            .write_spool(&item.procedure, &item.identifier, columns, rows)
            .await?;
        Ok(ItemOutcome { rows })
    }

    async fn abandon(&self, item: &WorkItem) {
        self.spool.discard(&item.procedure, &item.identifier).await;
    }
}

/// Calls the stored routine for the item; no output
pub struct InsertExecutor {
    statements: Arc<StatementCache>,
}

impl InsertExecutor {
    pub fn new(statements: Arc<StatementCache>) -> Self {
        Self { statements }
    }
}

#[async_trait]
impl ItemExecutor for InsertExecutor {
    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
        let stmt = self
            .statements
            .statement_for(&item.procedure)
            .ok_or_else(|| ItemError::MissingStatement(item.procedure.clone()))?;
        let rows = stmt.execute(&[item.identifier.as_str()]).await?;
        debug!(procedure = %item.procedure, sol_id = %item.identifier, rows, "Routine call completed");
        Ok(ItemOutcome { rows })
    }
}
