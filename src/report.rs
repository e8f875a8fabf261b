//! turns the row sink into the final, typed report

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{DseError, Result};

/// how the cells of one report column are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// two decimals, `0.00`
    Decimal,
    /// a fraction shown as `0.00%`
    Percent,
}

impl ColumnKind {
    pub fn of(column: &str) -> Self {
        match column {
            "pattern" | "trace" | "mapping" => ColumnKind::Text,
            "bw_usage" => ColumnKind::Percent,
            "avg_latency" | "mid_latency" => ColumnKind::Decimal,
            _ => ColumnKind::Integer,
        }
    }

    /// empty cells stay empty
    pub fn format(self, cell: &str) -> std::result::Result<String, String> {
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(String::new());
        }
        match self {
            ColumnKind::Text => Ok(cell.to_string()),
            // counters stay exact, only non-integral cells go through f64
            ColumnKind::Integer => match cell.parse::<u64>() {
                Ok(v) => Ok(v.to_string()),
                Err(_) => number(cell).map(|v| format!("{v:.0}")),
            },
            ColumnKind::Decimal => number(cell).map(|v| format!("{v:.2}")),
            ColumnKind::Percent => number(cell).map(|v| format!("{:.2}%", v * 100.0)),
        }
    }
}

fn number(cell: &str) -> std::result::Result<f64, String> {
    cell.parse()
        .map_err(|_| format!("`{cell}` is not a number"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
}

/// read `row_sink` and write the formatted report to `target`.
/// the row sink itself is only read.
pub fn build_report(row_sink: &Path, target: &Path) -> Result<ReportSummary> {
    let write_err = |reason: String| DseError::ReportWrite {
        path: target.to_path_buf(),
        reason,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(row_sink)
        .map_err(|e| write_err(format!("cannot read {row_sink:?}: {e}")))?;
    let headers = reader
        .headers()
        .map_err(|e| write_err(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Err(write_err(format!("{row_sink:?} has no header")));
    }
    let kinds: Vec<ColumnKind> = headers.iter().map(ColumnKind::of).collect();

    let mut formatted = vec![];
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| write_err(e.to_string()))?;
        let row = record
            .iter()
            .zip(&kinds)
            .map(|(cell, kind)| kind.format(cell))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|reason| write_err(format!("row {}: {reason}", idx + 1)))?;
        formatted.push(row);
    }
    if formatted.is_empty() {
        return Err(write_err(format!("{row_sink:?} has no rows")));
    }

    let mut writer = csv::Writer::from_path(target).map_err(|e| write_err(e.to_string()))?;
    writer
        .write_record(&headers)
        .map_err(|e| write_err(e.to_string()))?;
    for row in &formatted {
        writer
            .write_record(row)
            .map_err(|e| write_err(e.to_string()))?;
    }
    writer.flush().map_err(|e| write_err(e.to_string()))?;
    info!(rows = formatted.len(), ?target, "report written");
    Ok(ReportSummary {
        path: target.to_path_buf(),
        rows: formatted.len(),
        columns: headers.len(),
    })
}
