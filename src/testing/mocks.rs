//! Mock database for testing

use crate::db::{Database, DbError, Row, RowStream, SqlDialect, Statement};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Scripted behaviour for one (procedure, identifier) pair
#[derive(Debug, Clone)]
enum MockResponse {
    Rows(Vec<Row>),
    QueryError(String),
    ScanErrorAfter { rows: Vec<Row>, message: String },
}

/// One recorded statement execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub procedure: String,
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    dialect: Option<SqlDialect>,
    responses: HashMap<(String, String), MockResponse>,
    prepare_failures: HashSet<String>,
    hangs: HashSet<(String, String)>,
    delay: Option<Duration>,
    prepared: AtomicUsize,
    closed: AtomicUsize,
    executed: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builder for creating configured mock databases
#[derive(Debug, Default)]
pub struct MockDatabaseBuilder {
    state: MockState,
}

impl MockDatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.state.dialect = Some(dialect);
        self
    }

    /// Rows returned by the extract query for one pair
    pub fn with_rows(mut self, procedure: &str, identifier: &str, rows: Vec<Row>) -> Self {
        self.state
            .responses
            .insert(key(procedure, identifier), MockResponse::Rows(rows));
        self
    }

    /// Rows given as plain text cells, none of them NULL
    pub fn with_text_rows(self, procedure: &str, identifier: &str, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| Some(cell.to_string())).collect())
            .collect();
        self.with_rows(procedure, identifier, rows)
    }

    /// The query (or routine call) for one pair fails outright
    pub fn fail_query(mut self, procedure: &str, identifier: &str, message: &str) -> Self {
        self.state.responses.insert(
            key(procedure, identifier),
            MockResponse::QueryError(message.to_string()),
        );
        self
    }

    /// Alias of [`fail_query`](Self::fail_query) reading better for routine calls
    pub fn fail_call(self, procedure: &str, identifier: &str, message: &str) -> Self {
        self.fail_query(procedure, identifier, message)
    }

    /// Yield `rows`, then fail while scanning the next one
    pub fn fail_scan_after(
        mut self,
        procedure: &str,
        identifier: &str,
        rows: Vec<Row>,
        message: &str,
    ) -> Self {
        self.state.responses.insert(
            key(procedure, identifier),
            MockResponse::ScanErrorAfter {
                rows,
                message: message.to_string(),
            },
        );
        self
    }

    /// Preparing the statement for `procedure` fails
    pub fn fail_prepare(mut self, procedure: &str) -> Self {
        self.state.prepare_failures.insert(procedure.to_string());
        self
    }

    /// Every execution sleeps this long first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.state.delay = Some(delay);
        self
    }

    /// The execution for one pair never completes
    pub fn hang_on(mut self, procedure: &str, identifier: &str) -> Self {
        self.state.hangs.insert(key(procedure, identifier));
        self
    }

    pub fn build(self) -> MockDatabase {
        MockDatabase {
            state: Arc::new(self.state),
        }
    }
}

fn key(procedure: &str, identifier: &str) -> (String, String) {
    (procedure.to_string(), identifier.to_string())
}

/// In-memory database whose statements replay scripted responses.
///
/// Unscripted pairs return no rows and succeed.
#[derive(Debug, Clone)]
pub struct MockDatabase {
    state: Arc<MockState>,
}

impl Default for MockDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDatabase {
    pub fn new() -> Self {
        MockDatabaseBuilder::new().build()
    }

    pub fn builder() -> MockDatabaseBuilder {
        MockDatabaseBuilder::new()
    }

    pub fn prepared_count(&self) -> usize {
        self.state.prepared.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn executed_count(&self) -> usize {
        self.state.executed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.calls).clone()
    }
}

/// Procedure a generated statement targets
fn target_procedure(sql: &str) -> String {
    if let Some(idx) = sql.find(" FROM ") {
        let rest = &sql[idx + " FROM ".len()..];
        return rest.split_whitespace().next().unwrap_or_default().to_string();
    }
    let call = sql
        .trim_start_matches("BEGIN ")
        .trim_start_matches("CALL ");
    let routine = call.split('(').next().unwrap_or_default();
    routine.rsplit('.').next().unwrap_or_default().trim().to_string()
}

#[async_trait]
impl Database for MockDatabase {
    fn dialect(&self) -> SqlDialect {
        self.state.dialect.unwrap_or(SqlDialect::Oracle)
    }

    async fn prepare(
        &self,
        query: &str,
        param_count: usize,
    ) -> Result<Arc<dyn Statement>, DbError> {
        let procedure = target_procedure(query);
        if self.state.prepare_failures.contains(&procedure) {
            return Err(DbError::Prepare(format!(
                "{}: table or view does not exist",
                procedure
            )));
        }
        self.state.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockStatement {
            state: self.state.clone(),
            sql: query.to_string(),
            procedure,
            param_count,
        }))
    }
}

struct MockStatement {
    state: Arc<MockState>,
    sql: String,
    procedure: String,
    param_count: usize,
}

impl MockStatement {
    async fn begin(&self, params: &[&str]) -> Result<Option<MockResponse>, DbError> {
        if params.len() != self.param_count {
            return Err(DbError::ParameterCount {
                expected: self.param_count,
                actual: params.len(),
            });
        }
        let identifier = params.first().copied().unwrap_or_default();
        lock(&self.state.calls).push(MockCall {
            procedure: self.procedure.clone(),
            sql: self.sql.clone(),
            params: params.iter().map(|p| p.to_string()).collect(),
        });
        self.state.executed.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.state.delay {
            tokio::time::sleep(delay).await;
        }
        let pair = key(&self.procedure, identifier);
        if self.state.hangs.contains(&pair) {
            std::future::pending::<()>().await;
        }
        Ok(self.state.responses.get(&pair).cloned())
    }
}

#[async_trait]
impl Statement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn query<'a>(&'a self, params: &[&str]) -> Result<RowStream<'a>, DbError> {
        match self.begin(params).await? {
            None => Ok(stream::empty().boxed()),
            Some(MockResponse::Rows(rows)) => Ok(stream::iter(rows.into_iter().map(Ok)).boxed()),
            Some(MockResponse::QueryError(message)) => Err(DbError::Query(message)),
            Some(MockResponse::ScanErrorAfter { rows, message }) => Ok(stream::iter(
                rows.into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(DbError::Scan(message)))),
            )
            .boxed()),
        }
    }

    async fn execute(&self, params: &[&str]) -> Result<u64, DbError> {
        match self.begin(params).await? {
            Some(MockResponse::QueryError(message)) => Err(DbError::Query(message)),
            Some(MockResponse::ScanErrorAfter { message, .. }) => Err(DbError::Query(message)),
            Some(MockResponse::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(0),
        }
    }

    async fn close(&self) -> Result<(), DbError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_procedure_parsing() {
        assert_eq!(
            target_procedure("SELECT A, B FROM ACCT WHERE SOL_ID = :1"),
            "ACCT"
        );
        assert_eq!(target_procedure("BEGIN PKG.LOAD_ACCT(:1); END;"), "LOAD_ACCT");
        assert_eq!(target_procedure("CALL pkg.load_acct($1)"), "load_acct");
    }

    #[tokio::test]
    async fn test_scripted_rows_and_failures() {
        let db = MockDatabase::builder()
            .with_text_rows("ACCT", "1", &[&["a", "b"]])
            .fail_query("ACCT", "2", "ORA-01722: invalid number")
            .build();
        let stmt = db
            .prepare("SELECT A, B FROM ACCT WHERE SOL_ID = :1", 1)
            .await
            .unwrap();

        let rows: Vec<_> = stmt.query(&["1"]).await.unwrap().collect().await;
        assert_eq!(rows.len(), 1);
        assert!(matches!(stmt.query(&["2"]).await, Err(DbError::Query(_))));
        assert!(matches!(
            stmt.query(&["1", "extra"]).await,
            Err(DbError::ParameterCount { expected: 1, actual: 2 })
        ));
        assert_eq!(db.executed_count(), 2);
        assert_eq!(db.calls()[0].params, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_scripted() {
        let db = MockDatabase::builder().fail_prepare("LOAD_X").build();
        assert!(db.prepare("BEGIN PKG.LOAD_X(:1); END;", 1).await.is_err());
        assert!(db.prepare("BEGIN PKG.LOAD_Y(:1); END;", 1).await.is_ok());
        assert_eq!(db.prepared_count(), 1);
    }
}
