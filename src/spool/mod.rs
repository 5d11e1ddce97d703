//! Spool writer
//!
//! Each (procedure, identifier) pair gets its own `<procedure>_<identifier>.spool`
//! file. The writer knows nothing about other spool files; the merge stage
//! finds them by prefix afterwards.

use crate::config::ColumnSpec;
use crate::db::{DbError, RowStream};
use crate::error::{BatchError, ErrorCode};
use crate::format::{FormatError, RowFormatter};
use crate::resources::BufferPool;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

const SPOOL_BUFFER_SIZE: usize = 64 * 1024;

/// Name of the transient spool file for one work item
pub fn spool_file_name(procedure: &str, identifier: &str) -> String {
    format!("{}_{}.spool", procedure, identifier)
}

/// Name of a procedure's merged output file
pub fn final_file_name(procedure: &str) -> String {
    format!("{}.txt", procedure)
}

/// Reject identifiers whose spool file could be claimed by another procedure.
///
/// With procedures `ACC` and `ACC_BAL`, the item `(ACC, "BAL_1")` spools to
/// `ACC_BAL_1.spool`, which is both the name of `(ACC_BAL, "1")` and a file the
/// merge attributes to `ACC_BAL`.
pub fn ensure_unambiguous_names(
    procedures: &[String],
    identifiers: &[String],
) -> crate::error::Result<()> {
    for procedure in procedures {
        let longer: Vec<(&str, String)> = procedures
            .iter()
            .filter(|q| q.len() > procedure.len() && q.starts_with(procedure.as_str()))
            .map(|q| (q.as_str(), format!("{}_", q)))
            .collect();
        if longer.is_empty() {
            continue;
        }
        for identifier in identifiers {
            let stem = format!("{}_{}", procedure, identifier);
            if let Some((other, _)) = longer.iter().find(|(_, prefix)| stem.starts_with(prefix.as_str())) {
                return Err(BatchError::setup_with_code(
                    ErrorCode::SETUP_SPOOL_NAME_AMBIGUOUS,
                    format!(
                        "identifier '{}' of {} spools to {}, which belongs to procedure {}",
                        identifier,
                        procedure,
                        spool_file_name(procedure, identifier),
                        other
                    ),
                    Some(procedure.clone()),
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Row(#[from] DbError),
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Streams formatted rows into per-item spool files
#[derive(Debug, Clone)]
pub struct SpoolWriter {
    dir: PathBuf,
    formatter: RowFormatter,
    buffers: BufferPool,
}

impl SpoolWriter {
    pub fn new(dir: impl Into<PathBuf>, formatter: RowFormatter, buffers: BufferPool) -> Self {
        Self {
            dir: dir.into(),
            formatter,
            buffers,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, procedure: &str, identifier: &str) -> PathBuf {
        self.dir.join(spool_file_name(procedure, identifier))
    }

    /// Write every row of `rows` to the item's spool file, returning the row
    /// count.
    ///
    /// The file is flushed and closed on every exit path. When both writing
    /// and flushing fail, the writing error is the one reported.
    pub async fn write_spool(
        &self,
        procedure: &str,
        identifier: &str,
        columns: &[ColumnSpec],
        rows: RowStream<'_>,
    ) -> Result<u64, SpoolError> {
        let path = self.path_for(procedure, identifier);
        let file = File::create(&path).await.map_err(|source| SpoolError::Io {
            path: path.clone(),
            source,
        })?;
        let mut writer = BufWriter::with_capacity(SPOOL_BUFFER_SIZE, file);

        let written = self.write_rows(&mut writer, &path, columns, rows).await;
        let flushed = writer.flush().await.map_err(|source| SpoolError::Io {
            path: path.clone(),
            source,
        });
        drop(writer);

        let rows = written?;
        flushed?;
        debug!(procedure, sol_id = identifier, rows, "Spooled rows");
        Ok(rows)
    }

    async fn write_rows(
        &self,
        writer: &mut BufWriter<File>,
        path: &Path,
        columns: &[ColumnSpec],
        mut rows: RowStream<'_>,
    ) -> Result<u64, SpoolError> {
        let mut count = 0u64;
        while let Some(row) = rows.next().await {
            let row = row?;
            let mut line = self.buffers.acquire();
            self.formatter.format_into(&mut line, columns, &row)?;
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|source| SpoolError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove an item's spool file, if any
    pub async fn discard(&self, procedure: &str, identifier: &str) {
        let path = self.path_for(procedure, identifier);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed partial spool file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove spool file"),
        }
    }
}
