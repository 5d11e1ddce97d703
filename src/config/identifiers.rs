//! SOL id list loading

use crate::error::{BatchError, ErrorCode, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Parse an identifier list: one id per line, blanks and `#` comments skipped.
///
/// Duplicates are dropped, keeping the first occurrence, so the work-item
/// cross product never contains the same pair twice.
pub fn parse_identifiers(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut duplicates = 0usize;

    for line in content.lines() {
        let id = line.trim();
        if id.is_empty() || id.starts_with('#') {
            continue;
        }
        if seen.insert(id.to_string()) {
            ids.push(id.to_string());
        } else {
            duplicates += 1;
        }
    }

    if duplicates > 0 {
        warn!(duplicates, "Dropped duplicate SOL ids from identifier list");
    }
    ids
}

/// Read the identifier file; an unreadable or empty list is a setup error
pub async fn load_identifiers(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        BatchError::setup_with_code(
            ErrorCode::SETUP_IDENTIFIERS_UNREADABLE,
            format!("failed to read SOL ids from {}", path.display()),
            None,
        )
        .with_source(e)
    })?;

    let ids = parse_identifiers(&content);
    if ids.is_empty() {
        return Err(BatchError::setup_with_code(
            ErrorCode::SETUP_IDENTIFIERS_EMPTY,
            format!("no SOL ids found in {}", path.display()),
            None,
        ));
    }
    info!(count = ids.len(), path = %path.display(), "Loaded SOL ids");
    Ok(ids)
}
