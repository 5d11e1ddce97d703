//! # solbatch
//!
//! Batch-processes a list of SOL identifiers against a fixed set of database
//! procedures, either extracting rows into per-procedure output files or
//! invoking a stored routine per identifier.
//!
//! ## Usage
//!
//! ```bash
//! solbatch run --app-config app.yaml --run-config run.yaml --mode extract
//! ```
//!
//! ## Modules
//!
//! - `config` - App and run configuration, column templates, identifier lists
//! - `db` - Database boundary traits, SQL dialects, optional PostgreSQL backend
//! - `error` - Error types and codes
//! - `execution` - Work dispatch, worker pool, execution log, summaries, progress
//! - `format` - Delimited and fixed-width row formatting
//! - `merge` - Consolidation of spool files into one output file per procedure
//! - `resources` - Pooled line buffers
//! - `spool` - Per-item spool files
//! - `statements` - Prepared statement cache
//! - `testing` - In-memory database for tests and benchmarks
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod format;
pub mod merge;
pub mod resources;
pub mod spool;
pub mod statements;

pub mod testing;

pub use config::{AppConfig, RunConfig, RunMode};
pub use error::{BatchError, ErrorCode, Result};
pub use execution::{BatchReport, BatchRunner, BatchSettings};
