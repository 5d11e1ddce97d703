//! Statement cache
//!
//! Every procedure's statement is prepared once before the workers start and
//! shared read-only for the whole run. Extract statements are keyed by
//! procedure name, insert statements by `<package>.<procedure>`.

use crate::config::{RunMode, TemplateSet};
use crate::db::{Database, SqlDialect, Statement};
use crate::error::{common, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A statement to be prepared: cache key plus generated SQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementPlan {
    pub key: String,
    pub procedure: String,
    pub sql: String,
}

/// Cache key for a procedure's statement
pub fn statement_key(mode: RunMode, package: &str, procedure: &str) -> String {
    match mode {
        RunMode::Extract => procedure.to_string(),
        RunMode::Insert => format!("{}.{}", package, procedure),
    }
}

/// Generate the SQL for every procedure without touching the database
pub fn plan_statements(
    dialect: SqlDialect,
    mode: RunMode,
    procedures: &[String],
    package: &str,
    templates: &TemplateSet,
    identifier_column: &str,
) -> Result<Vec<StatementPlan>> {
    procedures
        .iter()
        .map(|proc| {
            let sql = match mode {
                RunMode::Extract => {
                    let columns = templates
                        .get(proc)
                        .ok_or_else(|| common::template_missing(proc))?;
                    dialect.select_by_identifier(proc, columns, identifier_column)
                }
                RunMode::Insert => dialect.call_routine(package, proc),
            };
            Ok(StatementPlan {
                key: statement_key(mode, package, proc),
                procedure: proc.clone(),
                sql,
            })
        })
        .collect()
}

/// Prepared statements for one run
pub struct StatementCache {
    mode: RunMode,
    package: String,
    statements: HashMap<String, Arc<dyn Statement>>,
    closed: AtomicBool,
}

impl StatementCache {
    /// Prepare every planned statement.
    ///
    /// If any preparation fails, the statements prepared so far are closed
    /// before the error is returned.
    pub async fn prepare_all(
        db: &dyn Database,
        mode: RunMode,
        package: &str,
        plans: &[StatementPlan],
    ) -> Result<Self> {
        let mut cache = Self {
            mode,
            package: package.to_string(),
            statements: HashMap::with_capacity(plans.len()),
            closed: AtomicBool::new(false),
        };

        for plan in plans {
            match db.prepare(&plan.sql, 1).await {
                Ok(stmt) => {
                    debug!(key = %plan.key, sql = %plan.sql, "Prepared statement");
                    cache.statements.insert(plan.key.clone(), stmt);
                }
                Err(e) => {
                    warn!(
                        key = %plan.key,
                        error = %e,
                        prepared = cache.statements.len(),
                        "Statement preparation failed, releasing prepared statements"
                    );
                    cache.close_all().await;
                    return Err(common::prepare_failed(&plan.key, &e).with_source(e));
                }
            }
        }

        info!(count = cache.statements.len(), mode = %mode, "Prepared database statements");
        Ok(cache)
    }

    /// Statement for a work item's procedure
    pub fn statement_for(&self, procedure: &str) -> Option<&Arc<dyn Statement>> {
        self.statements
            .get(&statement_key(self.mode, &self.package, procedure))
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Statement>> {
        self.statements.get(key)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Release every statement exactly once. Later calls do nothing.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (key, stmt) in &self.statements {
            if let Err(e) = stmt.close().await {
                warn!(key = %key, error = %e, "Failed to close statement");
            }
        }
        debug!(count = self.statements.len(), "Closed statement cache");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StatementCache {
    fn drop(&mut self) {
        if !self.is_closed() && !self.statements.is_empty() {
            warn!(
                count = self.statements.len(),
                "Statement cache dropped without close_all"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Align, ColumnSpec};
    use crate::error::ErrorCode;
    use crate::testing::MockDatabase;

    fn templates() -> TemplateSet {
        let mut set = TemplateSet::new();
        set.insert(
            "ACCT".to_string(),
            Arc::from(vec![
                ColumnSpec::new("ACCT_NO", 10, Align::Left),
                ColumnSpec::new("NAME", 20, Align::Left),
            ]),
        );
        set.insert(
            "LOAN".to_string(),
            Arc::from(vec![ColumnSpec::new("LOAN_ID", 8, Align::Right)]),
        );
        set
    }

    fn procs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_extract_uses_template_columns() {
        let plans = plan_statements(
            SqlDialect::Oracle,
            RunMode::Extract,
            &procs(&["ACCT", "LOAN"]),
            "PKG",
            &templates(),
            "SOL_ID",
        )
        .unwrap();
        assert_eq!(plans[0].key, "ACCT");
        assert_eq!(plans[0].sql, "SELECT ACCT_NO, NAME FROM ACCT WHERE SOL_ID = :1");
        assert_eq!(plans[1].sql, "SELECT LOAN_ID FROM LOAN WHERE SOL_ID = :1");
    }

    #[test]
    fn test_plan_extract_requires_template() {
        let err = plan_statements(
            SqlDialect::Oracle,
            RunMode::Extract,
            &procs(&["ACCT", "DEPOSIT"]),
            "PKG",
            &templates(),
            "SOL_ID",
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SETUP_TEMPLATE_MISSING);
    }

    #[test]
    fn test_plan_insert_keys_by_package() {
        let plans = plan_statements(
            SqlDialect::Oracle,
            RunMode::Insert,
            &procs(&["LOAD_ACCT"]),
            "LOADER",
            &TemplateSet::new(),
            "SOL_ID",
        )
        .unwrap();
        assert_eq!(plans[0].key, "LOADER.LOAD_ACCT");
        assert_eq!(plans[0].sql, "BEGIN LOADER.LOAD_ACCT(:1); END;");
    }

    #[tokio::test]
    async fn test_prepare_all_and_lookup() {
        let db = MockDatabase::new();
        let plans = plan_statements(
            db.dialect(),
            RunMode::Insert,
            &procs(&["A", "B"]),
            "PKG",
            &TemplateSet::new(),
            "SOL_ID",
        )
        .unwrap();
        let cache = StatementCache::prepare_all(&db, RunMode::Insert, "PKG", &plans)
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.statement_for("A").is_some());
        assert!(cache.get("PKG.B").is_some());
        assert!(cache.statement_for("C").is_none());
        cache.close_all().await;
        assert_eq!(db.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_prepare_failure_releases_earlier_statements() {
        let db = MockDatabase::builder().fail_prepare("C").build();
        let plans = plan_statements(
            db.dialect(),
            RunMode::Extract,
            &procs(&["ACCT", "LOAN", "C"]),
            "PKG",
            &{
                let mut t = templates();
                t.insert("C".to_string(), Arc::from(vec![ColumnSpec::new("X", 1, Align::Left)]));
                t
            },
            "SOL_ID",
        )
        .unwrap();

        let err = StatementCache::prepare_all(&db, RunMode::Extract, "PKG", &plans)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::SETUP_PREPARE_FAILED);
        assert_eq!(db.prepared_count(), 2);
        assert_eq!(db.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let db = MockDatabase::new();
        let plans = plan_statements(
            db.dialect(),
            RunMode::Insert,
            &procs(&["A"]),
            "PKG",
            &TemplateSet::new(),
            "SOL_ID",
        )
        .unwrap();
        let cache = StatementCache::prepare_all(&db, RunMode::Insert, "PKG", &plans)
            .await
            .unwrap();
        cache.close_all().await;
        cache.close_all().await;
        assert!(cache.is_closed());
        assert_eq!(db.closed_count(), 1);
    }
}
