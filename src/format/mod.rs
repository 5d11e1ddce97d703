//! Row formatting for spool output
//!
//! A result row becomes one output line, either delimiter-joined or laid out
//! in fixed-width columns. Delimited output performs no quoting: a value that
//! contains the delimiter produces an ambiguous line.

use crate::config::{Align, ColumnSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output layout of spooled rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    #[default]
    Delimited,
    #[serde(alias = "fixed-width", alias = "fixed_width")]
    Fixed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("row has {values} values but the template defines {columns} columns")]
    ArityMismatch { columns: usize, values: usize },
}

/// Replace embedded line breaks with a single space each
pub fn sanitize(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\n', '\r']) {
        std::borrow::Cow::Owned(value.replace(['\n', '\r'], " "))
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}

/// Formats result rows according to the configured layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFormatter {
    layout: OutputLayout,
    delimiter: String,
}

impl RowFormatter {
    pub fn delimited(delimiter: impl Into<String>) -> Self {
        Self {
            layout: OutputLayout::Delimited,
            delimiter: delimiter.into(),
        }
    }

    pub fn fixed_width() -> Self {
        Self {
            layout: OutputLayout::Fixed,
            delimiter: String::new(),
        }
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    /// Format a row into a new string
    pub fn format(
        &self,
        columns: &[ColumnSpec],
        values: &[Option<String>],
    ) -> Result<String, FormatError> {
        let mut out = String::new();
        self.format_into(&mut out, columns, values)?;
        Ok(out)
    }

    /// Format a row, appending to `out` (no trailing newline).
    ///
    /// Null values render as empty strings. The row must have exactly one
    /// value per column.
    pub fn format_into(
        &self,
        out: &mut String,
        columns: &[ColumnSpec],
        values: &[Option<String>],
    ) -> Result<(), FormatError> {
        if columns.len() != values.len() {
            return Err(FormatError::ArityMismatch {
                columns: columns.len(),
                values: values.len(),
            });
        }

        match self.layout {
            OutputLayout::Delimited => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.push_str(&self.delimiter);
                    }
                    out.push_str(&sanitize(value.as_deref().unwrap_or("")));
                }
            }
            OutputLayout::Fixed => {
                for (col, value) in columns.iter().zip(values) {
                    push_fixed(out, col, value.as_deref().unwrap_or(""));
                }
            }
        }
        Ok(())
    }
}

// Widths count chars, so multi-byte values never split mid-character.
fn push_fixed(out: &mut String, col: &ColumnSpec, value: &str) {
    let value = sanitize(value);
    let kept: &str = match value.char_indices().nth(col.length) {
        Some((byte_idx, _)) => &value[..byte_idx],
        None => &value,
    };
    let pad = col.length - kept.chars().count();

    match col.align {
        Align::Right => {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(kept);
        }
        Align::Left => {
            out.push_str(kept);
            out.extend(std::iter::repeat(' ').take(pad));
        }
    }
}
