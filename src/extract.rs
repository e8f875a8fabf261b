//! parsers for the three per-trial artifacts the simulator leaves behind

use std::{collections::BTreeMap, fs, path::Path};

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{DseError, Result};

pub const READ_REQUESTS: &str = "total_num_read_requests";
pub const WRITE_REQUESTS: &str = "total_num_write_requests";
pub const OTHER_REQUESTS: &str = "total_num_other_requests";
pub const MEMORY_CYCLES: &str = "memory_system_cycles";

static COUNTER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(total_num_other_requests|total_num_write_requests|total_num_read_requests|memory_system_cycles):\s*(\d+)",
    )
    .expect("counter pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean: f64,
    pub median: f64,
    pub count: usize,
}

impl LatencyStats {
    /// `None` for an empty column
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let sorted = values
            .iter()
            .copied()
            .sorted_by(|a, b| a.total_cmp(b))
            .collect_vec();
        let mid = count / 2;
        let median = if count % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        };
        Some(Self {
            mean,
            median,
            count,
        })
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| DseError::io(path, e))
}

/// per column mean/median/count of a headered access log
pub fn access_log_stats(path: &Path) -> Result<BTreeMap<String, LatencyStats>> {
    parse_access_log(&read(path)?, path)
}

pub fn parse_access_log(text: &str, path: &Path) -> Result<BTreeMap<String, LatencyStats>> {
    let mut stats = BTreeMap::new();
    for (name, values) in parse_columns(text, path)? {
        let s = LatencyStats::from_values(&values)
            .ok_or_else(|| DseError::malformed(path, "no data rows"))?;
        stats.insert(name, s);
    }
    debug!(?path, columns = stats.len(), "parsed access log");
    Ok(stats)
}

/// the numeric columns of a headered log, in header order
pub fn access_log_columns(path: &Path) -> Result<Vec<(String, Vec<f64>)>> {
    parse_columns(&read(path)?, path)
}

fn parse_columns(text: &str, path: &Path) -> Result<Vec<(String, Vec<f64>)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| DseError::malformed(path, e.to_string()))?
        .clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(DseError::malformed(path, "no header row"));
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DseError::malformed(path, e.to_string()))?;
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            let value = field.parse::<f64>().map_err(|_| {
                DseError::malformed(path, format!("row {}: `{field}` is not a number", line + 1))
            })?;
            column.push(value);
        }
    }
    Ok(headers.iter().map(str::to_string).zip(columns).collect())
}

/// `name: count` per line
pub fn command_counts(path: &Path) -> Result<BTreeMap<String, u64>> {
    parse_command_counts(&read(path)?, path)
}

pub fn parse_command_counts(text: &str, path: &Path) -> Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for (idx, line) in text.lines().enumerate() {
        let (name, value) = line
            .trim()
            .split(':')
            .collect_tuple()
            .ok_or_else(|| {
                DseError::malformed(path, format!("line {}: expected `name: count`", idx + 1))
            })?;
        let value = value.trim();
        let count = value.parse::<u64>().map_err(|_| {
            DseError::malformed(path, format!("line {}: `{value}` is not a count", idx + 1))
        })?;
        counts.insert(name.trim().to_string(), count);
    }
    Ok(counts)
}

/// the request and cycle counters printed by the simulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimCounters(BTreeMap<String, u64>);

impl SimCounters {
    pub fn get(&self, name: &str) -> Result<u64> {
        self.0
            .get(name)
            .copied()
            .ok_or_else(|| DseError::missing(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn simulator_counters(path: &Path) -> Result<SimCounters> {
    Ok(parse_simulator_counters(&read(path)?))
}

/// never fails: unrecognised lines are skipped and absent counters are
/// only reported when someone asks for them
pub fn parse_simulator_counters(text: &str) -> SimCounters {
    let mut counters = BTreeMap::new();
    for line in text.lines() {
        if let Some(caps) = COUNTER_LINE.captures(line) {
            if let Ok(value) = caps[2].parse::<u64>() {
                counters.insert(caps[1].to_string(), value);
            }
        }
    }
    SimCounters(counters)
}
