//! the shared row sink.
//!
//! workers never touch the file: completed rows go through a channel to a
//! single writer thread which appends them one at a time.

use std::{
    fs::File,
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info};

use crate::error::{DseError, Result};

pub const IDENTITY_COLUMNS: [&str; 3] = ["pattern", "trace", "mapping"];
pub const RESULT_COLUMNS: [&str; 6] = [
    "total_latency",
    "bw_usage",
    "avg_latency",
    "mid_latency",
    "read_req",
    "write_req",
];

/// one completed trial, flattened
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub pattern: String,
    pub trace: String,
    pub mapping: String,
    pub total_latency: u64,
    pub bw_usage: Option<f64>,
    pub avg_latency: f64,
    pub mid_latency: f64,
    pub read_req: u64,
    pub write_req: u64,
    /// counts in the order of the sweep's command list
    pub commands: Vec<u64>,
}

impl ReportRow {
    fn to_record(&self) -> Vec<String> {
        let mut record = vec![
            self.pattern.clone(),
            self.trace.clone(),
            self.mapping.clone(),
            self.total_latency.to_string(),
            self.bw_usage.map(|b| b.to_string()).unwrap_or_default(),
            self.avg_latency.to_string(),
            self.mid_latency.to_string(),
            self.read_req.to_string(),
            self.write_req.to_string(),
        ];
        record.extend(self.commands.iter().map(u64::to_string));
        record
    }
}

pub fn header(commands: &[String]) -> Vec<String> {
    IDENTITY_COLUMNS
        .iter()
        .chain(RESULT_COLUMNS.iter())
        .map(|c| c.to_string())
        .chain(commands.iter().cloned())
        .collect()
}

/// the append-only row file
pub struct RowLog {
    path: PathBuf,
    width: usize,
    writer: csv::Writer<File>,
}

impl RowLog {
    /// create the file and write its header, an existing file is an error
    pub fn create(path: &Path, commands: &[String]) -> Result<Self> {
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| DseError::io(path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let header = header(commands);
        writer
            .write_record(&header)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| csv_err(path, e))?;
        debug!(?path, "created row sink");
        Ok(Self {
            path: path.to_path_buf(),
            width: header.len(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// write one full row and flush it
    pub fn append(&mut self, row: &ReportRow) -> Result<()> {
        let record = row.to_record();
        if record.len() != self.width {
            return Err(DseError::io(
                &self.path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("row has {} fields, header has {}", record.len(), self.width),
                ),
            ));
        }
        self.writer
            .write_record(&record)
            .map_err(|e| csv_err(&self.path, e))?;
        self.writer
            .flush()
            .map_err(|e| DseError::io(&self.path, e))
    }
}

fn csv_err(path: &Path, e: csv::Error) -> DseError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => DseError::io(path, io),
        other => DseError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, format!("{other:?}")),
        ),
    }
}

/// where a trial hands its finished row
pub trait RowSink: Send + Sync {
    fn append(&self, row: ReportRow) -> Result<()>;
}

/// the sending half of the single-writer funnel
#[derive(Clone)]
pub struct RowSender {
    tx: Sender<ReportRow>,
    path: PathBuf,
}

impl RowSink for RowSender {
    fn append(&self, row: ReportRow) -> Result<()> {
        self.tx.send(row).map_err(|_| {
            DseError::io(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "row writer has stopped"),
            )
        })
    }
}

/// the writer thread, joins to the number of rows written
pub struct RowWriter {
    handle: JoinHandle<Result<usize>>,
}

impl RowWriter {
    /// start the writer; it exits once every [`RowSender`] is dropped
    pub fn spawn(log: RowLog) -> Result<(RowSender, RowWriter)> {
        let (tx, rx) = unbounded();
        let path = log.path().to_path_buf();
        let handle = thread::Builder::new()
            .name("row-writer".into())
            .spawn(move || write_rows(log, rx))
            .map_err(|e| DseError::io(&path, e))?;
        Ok((RowSender { tx, path }, RowWriter { handle }))
    }

    pub fn finish(self) -> Result<usize> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(DseError::io(
                "row-writer",
                std::io::Error::new(std::io::ErrorKind::Other, "row writer panicked"),
            )),
        }
    }
}

fn write_rows(mut log: RowLog, rx: Receiver<ReportRow>) -> Result<usize> {
    let mut written = 0;
    while let Ok(row) = rx.recv() {
        log.append(&row)?;
        written += 1;
        debug!(mapping = %row.mapping, pattern = %row.pattern, "row appended");
    }
    info!(rows = written, path = ?log.path(), "row sink closed");
    Ok(written)
}
