//! Merge stage
//!
//! Consolidates every `<procedure>_*.spool` file into `<procedure>.txt`.
//! Spool files are concatenated in lexicographic file name order, so the
//! final row order never depends on which worker finished first. Each spool
//! file is deleted once its lines have been copied.

use crate::error::{BatchError, ErrorCode};
use crate::spool::final_file_name;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{info, warn};

/// What to do when a single spool file cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeErrorPolicy {
    /// Log a warning, leave the file in place and merge the rest
    #[default]
    Skip,
    /// Stop merging this procedure at the first unreadable file
    Abort,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid spool pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("cannot create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read spool file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    pub fn code(&self) -> u16 {
        match self {
            MergeError::Pattern { .. } => ErrorCode::MERGE_DISCOVERY_FAILED,
            MergeError::Read { .. } => ErrorCode::MERGE_FILE_UNREADABLE,
            MergeError::Create { .. } | MergeError::Write { .. } => ErrorCode::MERGE_GENERIC,
        }
    }

    /// Lift into the crate error, tagged with the procedure being merged
    pub fn into_batch(self, procedure: &str) -> BatchError {
        BatchError::merge_with_code(self.code(), procedure, self.to_string()).with_source(self)
    }
}

/// Outcome of merging one procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub procedure: String,
    pub path: PathBuf,
    pub files_merged: usize,
    pub files_skipped: usize,
    pub lines: u64,
}

/// Merges spool files for the procedures of one run
#[derive(Debug, Clone)]
pub struct MergeStage {
    dir: PathBuf,
    procedures: Vec<String>,
    policy: MergeErrorPolicy,
}

impl MergeStage {
    /// `procedures` is the full list of the run; it is used to keep
    /// `ACC_*.spool` from swallowing the files of a procedure named `ACC_BAL`.
    ///
    /// A file always goes to the longest procedure whose prefix it carries,
    /// so `ACC_BAL_1.spool` is never merged into `ACC.txt`. Runs reject such
    /// identifiers up front (see [`crate::spool::ensure_unambiguous_names`]).
    pub fn new(dir: impl Into<PathBuf>, procedures: Vec<String>, policy: MergeErrorPolicy) -> Self {
        Self {
            dir: dir.into(),
            procedures,
            policy,
        }
    }

    pub fn policy(&self) -> MergeErrorPolicy {
        self.policy
    }

    /// Spool files belonging to `procedure`, sorted by file name
    pub fn discover(&self, procedure: &str) -> Result<Vec<PathBuf>, MergeError> {
        let pattern = format!(
            "{}/{}_*.spool",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            glob::Pattern::escape(procedure)
        );
        let entries = glob::glob(&pattern).map_err(|source| MergeError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        let longer: Vec<String> = self
            .procedures
            .iter()
            .filter(|p| p.len() > procedure.len() && p.starts_with(procedure))
            .map(|p| format!("{}_", p))
            .collect();

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(procedure, error = %e, "Skipping unreadable spool directory entry");
                    continue;
                }
            };
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if longer.iter().any(|prefix| name.starts_with(prefix)) {
                continue;
            }
            files.push((name, path));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Merge one procedure's spool files into its final file.
    ///
    /// The final file is always (re)created, so a procedure without spool
    /// files ends up with an empty output file.
    pub async fn merge(&self, procedure: &str) -> Result<MergeReport, BatchError> {
        self.merge_inner(procedure)
            .await
            .map_err(|e| e.into_batch(procedure))
    }

    async fn merge_inner(&self, procedure: &str) -> Result<MergeReport, MergeError> {
        info!(procedure, "Starting merge");
        let start = Instant::now();
        let files = self.discover(procedure)?;
        let final_path = self.dir.join(final_file_name(procedure));

        let out = File::create(&final_path)
            .await
            .map_err(|source| MergeError::Create {
                path: final_path.clone(),
                source,
            })?;
        let mut writer = BufWriter::new(out);
        let mut report = MergeReport {
            procedure: procedure.to_string(),
            path: final_path.clone(),
            files_merged: 0,
            files_skipped: 0,
            lines: 0,
        };

        // Each file is read completely before any of it reaches the output,
        // so a skipped file contributes nothing and a re-run stays clean.
        let mut pending = Vec::new();
        let mut outcome = Ok(());
        for file in &files {
            match read_spool_file(file, &mut pending).await {
                Ok(lines) => {
                    if let Err(source) = writer.write_all(&pending).await {
                        outcome = Err(MergeError::Write {
                            path: final_path.clone(),
                            source,
                        });
                        break;
                    }
                    report.lines += lines;
                    report.files_merged += 1;
                    if let Err(e) = tokio::fs::remove_file(file).await {
                        warn!(path = %file.display(), error = %e, "Failed to delete merged spool file");
                    }
                }
                Err(e @ MergeError::Read { .. }) if self.policy == MergeErrorPolicy::Skip => {
                    warn!(procedure, error = %e, "Skipping spool file");
                    report.files_skipped += 1;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let flushed = writer.flush().await.map_err(|source| MergeError::Write {
            path: final_path.clone(),
            source,
        });
        outcome?;
        flushed?;

        info!(
            procedure,
            files = report.files_merged,
            skipped = report.files_skipped,
            lines = report.lines,
            path = %final_path.display(),
            duration = ?start.elapsed(),
            "Merged spool files"
        );
        Ok(report)
    }

    /// Merge every procedure concurrently; all merges run to completion.
    pub async fn merge_all(&self) -> Vec<Result<MergeReport, BatchError>> {
        join_all(self.procedures.iter().map(|p| self.merge(p))).await
    }
}

async fn read_spool_file(source: &Path, buf: &mut Vec<u8>) -> Result<u64, MergeError> {
    let read_err = |e: std::io::Error| MergeError::Read {
        path: source.to_path_buf(),
        source: e,
    };
    let file = File::open(source).await.map_err(read_err)?;
    read_lines(&mut BufReader::new(file), buf)
        .await
        .map_err(read_err)
}

/// Read every line of `reader` into `buf`, replacing its contents.
///
/// Bytes are copied verbatim; only the line terminator is normalised to
/// `\n`, and a missing final terminator is added. On error `buf` holds a
/// partial file and must not be written.
async fn read_lines<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut lines = 0u64;
    loop {
        let start = buf.len();
        if reader.read_until(b'\n', buf).await? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.len() > start && buf.last() == Some(&b'\r') {
            buf.pop();
        }
        buf.push(b'\n');
        lines += 1;
    }
    Ok(lines)
}
