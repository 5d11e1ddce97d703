//! Run configuration
//!
//! A batch run is driven by two files: the application config (database
//! connection, worker count, log and identifier locations) and the run config
//! (package, procedures, output layout). Both may be written as JSON, YAML or
//! TOML; the format is picked from the file extension.

use crate::error::{common, BatchError, ErrorCode, Result};
use crate::format::{OutputLayout, RowFormatter};
use crate::merge::MergeErrorPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod identifiers;
pub mod loader;
pub mod template;

pub use identifiers::{load_identifiers, parse_identifiers};
pub use loader::{load_app_config, load_run_config, ConfigFormat};
pub use template::{load_column_template, load_templates, Align, ColumnSpec, TemplateSet};

/// Which kind of work each (identifier, procedure) pair performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Query rows, spool them per pair, merge per procedure
    Extract,
    /// Call a stored routine per pair, no output
    Insert,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Extract => "extract",
            RunMode::Insert => "insert",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e" | "extract" => Ok(RunMode::Extract),
            "i" | "insert" => Ok(RunMode::Insert),
            other => Err(common::invalid_value(
                "mode",
                format!(
                    "'{}' (valid values are 'E'/'extract' and 'I'/'insert')",
                    other
                ),
            )),
        }
    }
}

fn default_concurrency() -> usize {
    10
}

fn default_db_port() -> u16 {
    5432
}

fn default_connection_max_lifetime() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Application level settings shared by every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default)]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default)]
    pub db_sid: String,
    /// Full connection URL; takes precedence over the individual fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Number of concurrent workers (and database connections)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Directory receiving the execution log and summary
    pub log_file_path: PathBuf,
    /// File listing one SOL id per line
    pub sol_file_path: PathBuf,
    #[serde(with = "humantime_serde", default = "default_connection_max_lifetime")]
    pub connection_max_lifetime: Duration,
    /// Deadline for the whole run; the run is cancelled when it elapses
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_timeout: Option<Duration>,
}

impl AppConfig {
    /// Apply `SOLBATCH_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map)
    pub fn merge_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SOLBATCH_CONCURRENCY") {
            match value.parse::<usize>() {
                Ok(n) => self.concurrency = n,
                Err(_) => tracing::warn!(
                    value = %value,
                    "Ignoring SOLBATCH_CONCURRENCY, not a number"
                ),
            }
        }
        if let Some(url) = lookup("SOLBATCH_DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(dir) = lookup("SOLBATCH_LOG_DIR") {
            self.log_file_path = PathBuf::from(dir);
        }
    }

    /// Connection URL for the database backend
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_sid
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(common::invalid_value("concurrency", "must be at least 1"));
        }
        if self.sol_file_path.as_os_str().is_empty() {
            return Err(common::invalid_value("sol_file_path", "must not be empty"));
        }
        if self.log_file_path.as_os_str().is_empty() {
            return Err(common::invalid_value("log_file_path", "must not be empty"));
        }
        Ok(())
    }
}

fn default_spool_output_path() -> PathBuf {
    PathBuf::from("spool")
}

fn default_delimiter() -> String {
    "|".to_string()
}

fn default_identifier_column() -> String {
    "SOL_ID".to_string()
}

fn default_progress_interval() -> u64 {
    100
}

/// Settings for one batch: which procedures run and how output is laid out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Package owning the stored routines (insert mode) and naming the log files
    pub package_name: String,
    pub procedures: Vec<String>,
    #[serde(default = "default_spool_output_path")]
    pub spool_output_path: PathBuf,
    /// Directory holding `<procedure>.csv` column templates
    #[serde(default)]
    pub template_path: PathBuf,
    #[serde(default)]
    pub format: OutputLayout,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Column the extract query filters on
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    #[serde(default)]
    pub merge_error_policy: MergeErrorPolicy,
    /// Report progress every N completed items
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// Exit non-zero when any item failed
    #[serde(default)]
    pub strict: bool,
}

impl RunConfig {
    pub fn validate(&self, mode: RunMode) -> Result<()> {
        if self.procedures.is_empty() {
            return Err(common::invalid_value("procedures", "at least one is required"));
        }
        let mut seen = HashSet::new();
        for proc in &self.procedures {
            if proc.trim().is_empty() {
                return Err(common::invalid_value("procedures", "names must not be blank"));
            }
            if !seen.insert(proc.as_str()) {
                return Err(BatchError::config_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("procedure {} is listed more than once", proc),
                    None,
                ));
            }
        }
        if mode == RunMode::Insert && self.package_name.trim().is_empty() {
            return Err(common::invalid_value(
                "package_name",
                "required in insert mode",
            ));
        }
        if mode == RunMode::Extract {
            if self.format == OutputLayout::Delimited && self.delimiter.is_empty() {
                return Err(common::invalid_value(
                    "delimiter",
                    "must not be empty for delimited output",
                ));
            }
            if self.identifier_column.trim().is_empty() {
                return Err(common::invalid_value("identifier_column", "must not be empty"));
            }
        }
        if self.progress_interval == 0 {
            return Err(common::invalid_value("progress_interval", "must be at least 1"));
        }
        Ok(())
    }

    /// Formatter matching the configured layout
    pub fn row_formatter(&self) -> RowFormatter {
        match self.format {
            OutputLayout::Delimited => RowFormatter::delimited(self.delimiter.clone()),
            OutputLayout::Fixed => RowFormatter::fixed_width(),
        }
    }

    /// Execution log and summary file names for a mode
    pub fn log_file_names(&self, mode: RunMode) -> (String, String) {
        (
            format!("{}_{}.csv", self.package_name, mode.as_str()),
            format!("{}_{}_summary.csv", self.package_name, mode.as_str()),
        )
    }

    /// Full paths of the execution log and summary under `log_dir`
    pub fn log_file_paths(&self, log_dir: &Path, mode: RunMode) -> (PathBuf, PathBuf) {
        let (log, summary) = self.log_file_names(mode);
        (log_dir.join(log), log_dir.join(summary))
    }
}

#[cfg(test)]
mod tests;
