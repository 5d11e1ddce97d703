//! PostgreSQL backend built on a sqlx connection pool

use super::{Database, DbError, Row, RowStream, SqlDialect, Statement};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row as _};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pooled PostgreSQL connection source
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Open a pool sized to the worker count
    pub async fn connect(
        url: &str,
        max_connections: usize,
        max_lifetime: Duration,
    ) -> Result<Self, DbError> {
        let max_connections = u32::try_from(max_connections).unwrap_or(u32::MAX);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .max_lifetime(max_lifetime)
            .idle_timeout(Duration::from_secs(5 * 60))
            .connect(url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Database for PgDatabase {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn prepare(
        &self,
        query: &str,
        param_count: usize,
    ) -> Result<Arc<dyn Statement>, DbError> {
        // Describing the statement validates it up front; each pooled
        // connection keeps its own server-side copy in sqlx's statement cache.
        let described = (&self.pool)
            .prepare(query)
            .await
            .map_err(|e| DbError::Prepare(e.to_string()))?;
        if let Some(sqlx::Either::Left(params)) = sqlx::Statement::parameters(&described) {
            if params.len() != param_count {
                return Err(DbError::ParameterCount {
                    expected: param_count,
                    actual: params.len(),
                });
            }
        }
        debug!(sql = query, "Prepared statement");
        Ok(Arc::new(PgStatement {
            pool: self.pool.clone(),
            sql: query.to_string(),
            param_count,
        }))
    }
}

struct PgStatement {
    pool: PgPool,
    sql: String,
    param_count: usize,
}

impl PgStatement {
    fn check_params(&self, params: &[&str]) -> Result<(), DbError> {
        if params.len() != self.param_count {
            return Err(DbError::ParameterCount {
                expected: self.param_count,
                actual: params.len(),
            });
        }
        Ok(())
    }
}

fn decode_row(row: &PgRow) -> Result<Row, DbError> {
    (0..row.len())
        .map(|i| {
            row.try_get::<Option<String>, _>(i)
                .map_err(|e| DbError::Scan(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl Statement for PgStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn query<'a>(&'a self, params: &[&str]) -> Result<RowStream<'a>, DbError> {
        self.check_params(params)?;
        let mut query = sqlx::query(&self.sql);
        for param in params {
            query = query.bind(param.to_string());
        }
        let rows = query.fetch(&self.pool).map(|row| {
            let row = row.map_err(|e| DbError::Query(e.to_string()))?;
            decode_row(&row)
        });
        Ok(rows.boxed())
    }

    async fn execute(&self, params: &[&str]) -> Result<u64, DbError> {
        self.check_params(params)?;
        let mut query = sqlx::query(&self.sql);
        for param in params {
            query = query.bind(param.to_string());
        }
        let done = query
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(done.rows_affected())
    }

    async fn close(&self) -> Result<(), DbError> {
        // Server-side statements live in the per-connection cache and go
        // away with the pool.
        debug!(sql = %self.sql, "Released statement");
        Ok(())
    }
}
