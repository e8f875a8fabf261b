use std::{fmt, io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = DseError> = std::result::Result<T, E>;

/// the stage of a trial that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStage {
    Directory,
    ConfigMerge,
    Simulator,
    Parse,
    Sink,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialStage::Directory => "directory",
            TrialStage::ConfigMerge => "config merge",
            TrialStage::Simulator => "simulator",
            TrialStage::Parse => "parse",
            TrialStage::Sink => "row sink",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DseError {
    #[error("cannot load config {path:?}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("malformed log {path:?}: {reason}")]
    MalformedLog { path: PathBuf, reason: String },

    #[error("counter `{name}` is missing from the simulator output")]
    MissingCounter { name: String },

    #[error("trial {mapping}/{pattern} failed at the {stage} stage")]
    Trial {
        mapping: String,
        pattern: String,
        stage: TrialStage,
        #[source]
        source: Box<DseError>,
    },

    #[error("cannot write report {path:?}: {reason}")]
    ReportWrite { path: PathBuf, reason: String },

    #[error("simulator exited with {status}, see {log:?}")]
    SimulatorExit {
        status: std::process::ExitStatus,
        log: PathBuf,
    },

    #[error("cannot build the worker pool: {0}")]
    WorkerPool(String),

    #[error("io error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DseError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DseError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DseError::MalformedLog {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        DseError::MissingCounter { name: name.into() }
    }

    /// the stage of a failed trial, `None` for every other error
    pub fn trial_stage(&self) -> Option<TrialStage> {
        match self {
            DseError::Trial { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
