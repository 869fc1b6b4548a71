//! `columns` command: resolve a file's header row offline and print the
//! resulting field mapping.

use std::path::Path;

use annot_core::{CanonicalField, ColumnMapping, ColumnMappingResolver};
use annot_import::{parse_overrides, read_headers};

/// Header row of a file and the mapping resolved from it.
#[derive(Debug)]
pub(crate) struct ColumnReport {
    pub headers: Vec<String>,
    pub mapping: ColumnMapping,
}

impl ColumnReport {
    /// Headers no canonical field claimed. They are ignored on import.
    pub fn unmapped(&self) -> Vec<&str> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.mapping.resolved().any(|(_, c)| c.index == *index))
            .map(|(_, header)| header.as_str())
            .collect()
    }
}

pub(crate) fn resolve_columns(file: &Path, overrides: Option<&str>) -> anyhow::Result<ColumnReport> {
    let overrides = parse_overrides(overrides)?;
    let headers = read_headers(file)
        .map_err(|e| anyhow::anyhow!("could not read {}: {e}", file.display()))?;
    let mapping = ColumnMappingResolver::new().resolve(&headers, &overrides)?;
    Ok(ColumnReport { headers, mapping })
}

pub(crate) fn run_columns(file: &Path, overrides: Option<&str>, json: bool) -> anyhow::Result<()> {
    let report = resolve_columns(file, overrides)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.mapping)?);
        return Ok(());
    }

    for field in CanonicalField::ALL {
        let column = report.mapping.header(field).unwrap_or("-");
        let marker = if field.is_required() { " (required)" } else { "" };
        println!("{:<14} {column}{marker}", field.as_str());
    }
    let unmapped = report.unmapped();
    if !unmapped.is_empty() {
        println!("unmapped columns: {}", unmapped.join(", "));
    }
    Ok(())
}
