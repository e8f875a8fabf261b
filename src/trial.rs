use std::{
    collections::BTreeMap,
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, info, info_span, warn};

use crate::{
    error::{DseError, Result, TrialStage},
    extract::{self, LatencyStats, SimCounters, MEMORY_CYCLES, READ_REQUESTS, WRITE_REQUESTS},
    settings::SweepConfig,
    sink::{ReportRow, RowSink},
    template::{ConfigTemplate, ConfigValue, Scalar},
    types::{MappingPolicy, TrialSpec},
};

/// the access log column holding end-to-end request latency
pub const PROCESS_COLUMN: &str = "process";

/// runs the memory simulator on one materialized config
pub trait Simulator: Send + Sync {
    /// run to completion with stdout and stderr going to `log`
    fn run(&self, config: &Path, log: &Path) -> Result<()>;
}

/// the real simulator binary, invoked as `binary -f <config>`
#[derive(Debug, Clone)]
pub struct ExternalSimulator {
    binary: PathBuf,
}

impl ExternalSimulator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Simulator for ExternalSimulator {
    fn run(&self, config: &Path, log: &Path) -> Result<()> {
        let stdout = File::create(log).map_err(|e| DseError::io(log, e))?;
        let stderr = stdout.try_clone().map_err(|e| DseError::io(log, e))?;
        debug!(binary = ?self.binary, ?config, "spawning simulator");
        let status = Command::new(&self.binary)
            .arg("-f")
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|e| DseError::io(&self.binary, e))?;
        if !status.success() {
            return Err(DseError::SimulatorExit {
                status,
                log: log.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// every file a trial reads or writes
#[derive(Debug, Clone)]
pub struct TrialPaths {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub access_log: PathBuf,
    /// the recorder appends `_ch<N>.log` per channel
    pub cmd_trace_prefix: PathBuf,
    pub cmd_count_log: PathBuf,
    pub stdout_log: PathBuf,
}

impl TrialPaths {
    pub fn new(output_dir: &Path, spec: &TrialSpec) -> Self {
        let pattern = spec.pattern.name();
        let dir = mapping_dir(output_dir, spec.mapping).join(pattern);
        Self {
            config: dir.join(format!("{pattern}.yaml")),
            access_log: dir.join(format!("{pattern}.csv")),
            cmd_trace_prefix: dir.join(format!("{pattern}_issue_log")),
            cmd_count_log: dir.join(format!("{pattern}_cmd_cnt.log")),
            stdout_log: dir.join("stdout.log"),
            dir,
        }
    }

    pub fn cmd_trace(&self, channel: usize) -> PathBuf {
        let mut name = self.cmd_trace_prefix.clone().into_os_string();
        name.push(format!("_ch{channel}.log"));
        PathBuf::from(name)
    }
}

pub fn mapping_dir(output_dir: &Path, mapping: &MappingPolicy) -> PathBuf {
    output_dir.join(mapping.as_str())
}

/// the overrides that point the base config at one trial's files
pub fn trial_overrides(spec: &TrialSpec, paths: &TrialPaths, commands: &[String]) -> ConfigValue {
    let plugin = |entries: Vec<(&str, ConfigValue)>| {
        ConfigValue::map([("ControllerPlugin", ConfigValue::map(entries))])
    };
    ConfigValue::map([
        (
            "Frontend",
            ConfigValue::map([
                ("path", ConfigValue::path(spec.pattern.path())),
                ("access_log", ConfigValue::path(&paths.access_log)),
            ]),
        ),
        (
            "MemorySystem",
            ConfigValue::map([
                (
                    "AddrMapper",
                    ConfigValue::map([("mapping", ConfigValue::str(spec.mapping.as_str()))]),
                ),
                (
                    "Controller",
                    ConfigValue::map([(
                        "plugins",
                        ConfigValue::list([
                            plugin(vec![
                                ("impl", ConfigValue::str("TraceRecorder")),
                                ("path", ConfigValue::path(&paths.cmd_trace_prefix)),
                            ]),
                            plugin(vec![
                                ("impl", ConfigValue::str("CommandCounter")),
                                ("path", ConfigValue::path(&paths.cmd_count_log)),
                                (
                                    "commands_to_count",
                                    ConfigValue::list(commands.iter().map(ConfigValue::str)),
                                ),
                            ]),
                        ]),
                    )]),
                ),
            ]),
        ),
    ])
}

/// everything parsed out of one trial's artifacts
#[derive(Debug, Clone)]
pub struct TrialResult {
    pub counters: SimCounters,
    /// the `process` column of the access log
    pub process: LatencyStats,
    pub commands: BTreeMap<String, u64>,
}

impl TrialResult {
    pub fn collect(paths: &TrialPaths) -> Result<Self> {
        Ok(Self {
            process: extract::access_log_stats(&paths.access_log)?
                .remove(PROCESS_COLUMN)
                .ok_or_else(|| {
                    DseError::malformed(&paths.access_log, format!("no `{PROCESS_COLUMN}` column"))
                })?,
            commands: extract::command_counts(&paths.cmd_count_log)?,
            counters: extract::simulator_counters(&paths.stdout_log)?,
        })
    }

    /// `None` when the simulator reports zero cycles
    pub fn bandwidth_utilization(&self, burst_width: u64) -> Result<Option<f64>> {
        let reads = self.counters.get(READ_REQUESTS)?;
        let writes = self.counters.get(WRITE_REQUESTS)?;
        let cycles = self.counters.get(MEMORY_CYCLES)?;
        Ok(bandwidth_utilization(reads, writes, cycles, burst_width))
    }

    pub fn to_row(&self, spec: &TrialSpec, config: &SweepConfig) -> Result<ReportRow> {
        let commands = config
            .commands
            .iter()
            .map(|c| self.commands.get(c).copied().ok_or_else(|| DseError::missing(c)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ReportRow {
            pattern: spec.pattern.name().to_string(),
            trace: spec.pattern.path().to_string_lossy().into_owned(),
            mapping: spec.mapping.to_string(),
            total_latency: self.counters.get(MEMORY_CYCLES)?,
            bw_usage: self.bandwidth_utilization(config.burst_width)?,
            avg_latency: self.process.mean,
            mid_latency: self.process.median,
            read_req: self.counters.get(READ_REQUESTS)?,
            write_req: self.counters.get(WRITE_REQUESTS)?,
            commands,
        })
    }
}

pub fn bandwidth_utilization(reads: u64, writes: u64, cycles: u64, burst_width: u64) -> Option<f64> {
    if cycles == 0 {
        return None;
    }
    Some((reads + writes) as f64 * burst_width as f64 / cycles as f64)
}

/// runs one trial from an empty directory to an appended row
pub struct TrialExecutor<'a> {
    config: &'a SweepConfig,
    template: &'a ConfigTemplate,
    simulator: &'a dyn Simulator,
    sink: &'a dyn RowSink,
}

impl<'a> TrialExecutor<'a> {
    pub fn new(
        config: &'a SweepConfig,
        template: &'a ConfigTemplate,
        simulator: &'a dyn Simulator,
        sink: &'a dyn RowSink,
    ) -> Self {
        Self {
            config,
            template,
            simulator,
            sink,
        }
    }

    pub fn run(&self, spec: &TrialSpec) -> Result<ReportRow> {
        let span = info_span!("trial", mapping = %spec.mapping, pattern = spec.pattern.name());
        let _entered = span.enter();
        let stage = |stage| at_stage(spec, stage);

        let paths = TrialPaths::new(&self.config.output_dir, spec);
        fresh_dir(&paths.dir).map_err(stage(TrialStage::Directory))?;

        let overrides = trial_overrides(spec, &paths, &self.config.commands);
        self.template
            .materialize(&overrides, &paths.config)
            .map_err(stage(TrialStage::ConfigMerge))?;

        self.simulator
            .run(&paths.config, &paths.stdout_log)
            .map_err(stage(TrialStage::Simulator))?;

        let row = TrialResult::collect(&paths)
            .and_then(|result| result.to_row(spec, self.config))
            .map_err(stage(TrialStage::Parse))?;

        self.sink
            .append(row.clone())
            .map_err(stage(TrialStage::Sink))?;
        info!(cycles = row.total_latency, bw_usage = ?row.bw_usage, "trial finished");
        Ok(row)
    }
}

fn at_stage(spec: &TrialSpec, stage: TrialStage) -> impl FnOnce(DseError) -> DseError {
    let mapping = spec.mapping.to_string();
    let pattern = spec.pattern.name().to_string();
    move |source| DseError::Trial {
        mapping,
        pattern,
        stage,
        source: Box::new(source),
    }
}

/// create `dir` empty, discarding whatever was there
fn fresh_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        warn!(?dir, "deleting existing trial directory");
        fs::remove_dir_all(dir).map_err(|e| DseError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| DseError::io(dir, e))
}

/// a string or integer config leaf rendered as text
pub fn scalar_text(value: &ConfigValue) -> Option<String> {
    match value {
        ConfigValue::Scalar(Scalar::Str(s)) => Some(s.clone()),
        ConfigValue::Scalar(Scalar::Int(i)) => Some(i.to_string()),
        _ => None,
    }
}
