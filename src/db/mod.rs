//! Database boundary
//!
//! The batch core only needs two operations from a database: prepare a
//! parameterized statement, and execute it with bound parameters, getting
//! rows back or an error. Connection pooling is the backend's concern; a
//! backend must tolerate concurrent use up to the configured worker count.

use crate::config::ColumnSpec;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "postgres")]
pub mod postgres;

/// One result row; SQL NULL is `None`
pub type Row = Vec<Option<String>>;

/// Lazily produced result rows
pub type RowStream<'a> = BoxStream<'a, Result<Row, DbError>>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("prepare failed: {0}")]
    Prepare(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("row scan failed: {0}")]
    Scan(String),
    #[error("expected {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },
    #[error("statement is closed")]
    Closed,
}

/// A source of prepared statements
#[async_trait]
pub trait Database: Send + Sync {
    /// SQL flavour used to build the batch's queries
    fn dialect(&self) -> SqlDialect;

    /// Prepare `query`, which takes `param_count` positional parameters
    async fn prepare(
        &self,
        query: &str,
        param_count: usize,
    ) -> Result<Arc<dyn Statement>, DbError>;
}

/// A prepared, reusable statement. Must be safe to execute concurrently.
#[async_trait]
pub trait Statement: Send + Sync {
    fn sql(&self) -> &str;

    /// Run the statement, returning its rows as a stream
    async fn query<'a>(&'a self, params: &[&str]) -> Result<RowStream<'a>, DbError>;

    /// Run the statement for its side effects, returning affected rows
    async fn execute(&self, params: &[&str]) -> Result<u64, DbError>;

    /// Release the statement's resources
    async fn close(&self) -> Result<(), DbError>;
}

/// SQL flavours the batch can generate statements for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// `:1` placeholders, anonymous PL/SQL block for routine calls
    Oracle,
    /// `$1` placeholders, `CALL` for routine calls
    Postgres,
}

impl SqlDialect {
    /// Placeholder for the 1-based parameter `n`
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Oracle => format!(":{}", n),
            SqlDialect::Postgres => format!("${}", n),
        }
    }

    /// `SELECT <columns> FROM <table> WHERE <identifier_column> = <p1>`
    pub fn select_by_identifier(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        identifier_column: &str,
    ) -> String {
        let projection = columns
            .iter()
            .map(|c| match self {
                SqlDialect::Oracle => c.name.clone(),
                // Every column is read back as text.
                SqlDialect::Postgres => format!("CAST({} AS TEXT)", c.name),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            projection,
            table,
            identifier_column,
            self.placeholder(1)
        )
    }

    /// Single-parameter call of `<package>.<procedure>`
    pub fn call_routine(&self, package: &str, procedure: &str) -> String {
        match self {
            SqlDialect::Oracle => format!(
                "BEGIN {}.{}({}); END;",
                package,
                procedure,
                self.placeholder(1)
            ),
            SqlDialect::Postgres => {
                format!("CALL {}.{}({})", package, procedure, self.placeholder(1))
            }
        }
    }
}
