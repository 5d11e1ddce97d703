//! Column templates
//!
//! Each extract procedure has a CSV template `<template_path>/<procedure>.csv`
//! listing its projected columns in order. The header row names the fields
//! (`name`, `length`, `align`, matched case-insensitively); only `name` is
//! mandatory.

use crate::error::{common, BatchError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Padding side for fixed-width output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Right,
}

impl Align {
    /// `right` (any case) aligns right; everything else, including blank, is left
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("right") {
            Align::Right
        } else {
            Align::Left
        }
    }
}

/// One projected column of an extract procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Width in characters for fixed-width output
    pub length: usize,
    #[serde(default)]
    pub align: Align,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, length: usize, align: Align) -> Self {
        Self {
            name: name.into(),
            length,
            align,
        }
    }
}

/// Column templates keyed by procedure name, shared read-only by all workers
pub type TemplateSet = HashMap<String, Arc<[ColumnSpec]>>;

fn invalid_template(path: &Path, message: impl Into<String>) -> BatchError {
    BatchError::setup_with_code(ErrorCode::SETUP_TEMPLATE_INVALID, message, None)
        .with_context(path.display())
}

/// Read a single column template
pub fn load_column_template(path: &Path) -> Result<Vec<ColumnSpec>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| invalid_template(path, "cannot open template").with_source(e))?;

    let headers = reader
        .headers()
        .map_err(|e| invalid_template(path, "cannot read template header").with_source(e))?
        .clone();
    let position = |field: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(field));

    let name_idx =
        position("name").ok_or_else(|| invalid_template(path, "template has no 'name' column"))?;
    let length_idx = position("length");
    let align_idx = position("align");

    let mut columns = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| invalid_template(path, "malformed template row").with_source(e))?;
        let name = match record.get(name_idx) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let length = length_idx
            .and_then(|i| record.get(i))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let align = align_idx
            .and_then(|i| record.get(i))
            .map(Align::parse_lenient)
            .unwrap_or_default();
        columns.push(ColumnSpec {
            name,
            length,
            align,
        });
    }

    if columns.is_empty() {
        return Err(invalid_template(path, "template defines no columns"));
    }
    debug!(path = %path.display(), columns = columns.len(), "Loaded column template");
    Ok(columns)
}

/// Load the template of every procedure from `dir`
pub fn load_templates(dir: &Path, procedures: &[String]) -> Result<TemplateSet> {
    let mut templates = TemplateSet::with_capacity(procedures.len());
    for proc in procedures {
        let path = dir.join(format!("{}.csv", proc));
        if !path.exists() {
            return Err(common::template_missing(proc).with_context(path.display()));
        }
        let columns = load_column_template(&path)?;
        templates.insert(proc.clone(), Arc::from(columns));
    }
    Ok(templates)
}
