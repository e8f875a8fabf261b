use std::{collections::HashSet, path::PathBuf};

use config::{Config, Environment};
use serde::Deserialize;

use crate::{
    error::{DseError, Result},
    types::{MappingPolicy, TracePattern},
};

fn default_simulator() -> PathBuf {
    "./build/ramulator2".into()
}
fn default_base_config() -> PathBuf {
    "ddr4.yaml".into()
}
fn default_output_dir() -> PathBuf {
    "./log".into()
}
fn default_commands() -> Vec<String> {
    ["ACT", "PRE", "PREA", "RD", "WR", "RDA", "WRA", "REFab"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}
fn default_burst_width() -> u64 {
    4
}
fn default_max_workers() -> usize {
    8
}
fn default_plot() -> bool {
    true
}

/// the parameters of one sweep, built once and shared read-only
#[derive(Deserialize, Debug, Clone)]
pub struct SweepConfig {
    #[serde(default = "default_simulator")]
    pub simulator: PathBuf,
    #[serde(default = "default_base_config")]
    pub base_config: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub mappings: Vec<MappingPolicy>,
    /// iterated in this order inside every worker
    pub traces: Vec<TracePattern>,
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
    #[serde(default = "default_burst_width")]
    pub burst_width: u64,
    /// upper bound on concurrent mappings
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub auto_clean: bool,
    #[serde(default = "default_plot")]
    pub plot: bool,
    #[serde(default)]
    pub verbose: bool,
}

/// values from the command line, applied on top of the files
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub base_config: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub auto_clean: bool,
    pub verbose: bool,
    pub no_plot: bool,
}

/// `DSE_*` variables, `DSE_MAPPINGS` and `DSE_COMMANDS` take comma separated lists.
/// `traces` is a list of tables and can only come from the files.
fn environment(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("mappings")
        .with_list_parse_key("commands")
}

impl SweepConfig {
    pub fn new(config_files: &[PathBuf], cli: &CliOverrides) -> Result<Self> {
        Self::with_environment(config_files, cli, environment("DSE"))
    }

    fn with_environment(
        config_files: &[PathBuf],
        cli: &CliOverrides,
        env: Environment,
    ) -> Result<Self> {
        let path_str = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().into_owned());
        let origin = config_files.first().cloned().unwrap_or_default();
        let load_err = |e: config::ConfigError| DseError::ConfigLoad {
            path: origin.clone(),
            reason: e.to_string(),
        };

        let mut builder = Config::builder();
        for file in config_files {
            builder = builder.add_source(config::File::from(file.as_path()));
        }
        builder = builder
            .add_source(env)
            .set_override_option("base_config", path_str(&cli.base_config))
            .and_then(|b| b.set_override_option("output_dir", path_str(&cli.output_dir)))
            .and_then(|b| b.set_override_option("auto_clean", cli.auto_clean.then_some(true)))
            .and_then(|b| b.set_override_option("verbose", cli.verbose.then_some(true)))
            .and_then(|b| b.set_override_option("plot", cli.no_plot.then_some(false)))
            .map_err(load_err)?;
        let settings: SweepConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(load_err)?;
        settings.validate().map_err(|reason| DseError::ConfigLoad {
            path: origin.clone(),
            reason,
        })?;
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.mappings.is_empty() {
            return Err("no mapping policies to sweep".into());
        }
        if self.traces.is_empty() {
            return Err("no trace patterns to sweep".into());
        }
        if self.max_workers == 0 {
            return Err("max_workers must be at least 1".into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.mappings.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(format!("mapping `{dup}` is listed twice"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.traces.iter().find(|t| !seen.insert(t.name())) {
            return Err(format!("trace pattern `{}` is listed twice", dup.name()));
        }
        Ok(())
    }

    /// the worker pool size, never more than one worker per mapping
    pub fn worker_count(&self) -> usize {
        self.max_workers.min(self.mappings.len()).max(1)
    }

    pub fn row_sink_path(&self) -> PathBuf {
        self.output_dir.join("result.csv")
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("result_report.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("summary.json")
    }
}
