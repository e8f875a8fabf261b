use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use mapping_dse::{
    error::{DseError, TrialStage},
    plot,
    run_main::{run, RunOutcome},
    scheduler::run_sweep,
    settings::SweepConfig,
    sink::{RowLog, RowWriter},
    template::ConfigTemplate,
    trial::{scalar_text, Simulator},
    types::{MappingPolicy, TracePattern},
};

const BASE: &str = r#"
Frontend:
  impl: LoadStoreTrace
  clock_ratio: 8
MemorySystem:
  impl: GenericDRAM
  clock_ratio: 3
  DRAM:
    impl: DDR4
    org:
      preset: DDR4_8Gb_x8
      channel: 1
      rank: 2
  AddrMapper:
    impl: LinearMapper
  Controller:
    impl: Generic
    Scheduler:
      impl: FRFCFS
    plugins: []
"#;

const COMMANDS: [&str; 3] = ["ACT", "PRE", "RD"];

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mapping_dse_it_{}_{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn sweep_config(root: &Path, mappings: &[&str], patterns: &[&str]) -> SweepConfig {
    let base_config = root.join("ddr4.yaml");
    fs::write(&base_config, BASE).unwrap();
    SweepConfig {
        simulator: "unused".into(),
        base_config,
        output_dir: root.join("log"),
        mappings: mappings
            .iter()
            .map(|m| MappingPolicy::new(*m).unwrap())
            .collect(),
        traces: patterns
            .iter()
            .map(|p| TracePattern::new(*p, format!("trace/{p}.trace")).unwrap())
            .collect(),
        commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
        burst_width: 4,
        max_workers: 8,
        auto_clean: false,
        plot: false,
        verbose: false,
    }
}

/// stands in for the simulator: reads the trial config and writes the
/// artifacts the real one would
struct FakeSimulator {
    /// mappings whose runs fail outright
    broken: Vec<String>,
    /// mappings whose command count log is garbage
    garbled: Vec<String>,
}

impl FakeSimulator {
    fn healthy() -> Self {
        Self {
            broken: vec![],
            garbled: vec![],
        }
    }
}

impl Simulator for FakeSimulator {
    fn run(&self, config: &Path, log: &Path) -> mapping_dse::error::Result<()> {
        let trial = ConfigTemplate::load(config)?;
        let value = |key: &str| {
            trial
                .base()
                .lookup(key)
                .and_then(scalar_text)
                .unwrap_or_else(|| panic!("{key} missing from {config:?}"))
        };
        let mapping = value("MemorySystem.AddrMapper.mapping");
        assert_eq!(value("Frontend.clock_ratio"), "8");
        if self.broken.contains(&mapping) {
            return Err(DseError::io(
                log,
                std::io::Error::new(std::io::ErrorKind::Other, "simulator crashed"),
            ));
        }
        let trace = value("Frontend.path");
        let reads = 100 + trace.len() as u64;

        fs::write(
            value("Frontend.access_log"),
            "process, queue\n10, 1\n20, 2\n30, 3\n",
        )
        .unwrap();
        fs::write(
            format!(
                "{}_ch0.log",
                value("MemorySystem.Controller.plugins.0.ControllerPlugin.path")
            ),
            "     10,    ACT, 0, 0, 0, 1, 0\n     14,     RD, 0, 0, 0, 1, 0\n",
        )
        .unwrap();
        let counts = if self.garbled.contains(&mapping) {
            "ACT 10\n".to_string()
        } else {
            COMMANDS
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{c}: {}\n", i * 10))
                .collect()
        };
        fs::write(
            value("MemorySystem.Controller.plugins.1.ControllerPlugin.path"),
            counts,
        )
        .unwrap();
        fs::write(
            log,
            format!(
                "Frontend:\n  total_num_read_requests: {reads}\n  total_num_write_requests: 50\n  noise\n  memory_system_cycles: 1000\n"
            ),
        )
        .unwrap();
        Ok(())
    }
}

fn row_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn two_mappings_by_three_traces() {
    let root = scratch("grid");
    let config = sweep_config(
        &root,
        &["1RA-16R-2B-7C-2BG", "1RA-16R-7C-2B-2BG"],
        &["stream", "rand128B", "rand256B"],
    );
    let outcome = run(&config, &FakeSimulator::healthy()).unwrap();
    let RunOutcome::Completed { summary, rows, report } = outcome else {
        panic!("sweep did not run");
    };
    assert_eq!(rows, 6);
    assert_eq!(summary.ok_list.len(), 6);
    assert!(summary.err_list.is_empty());

    let sink = row_lines(&config.row_sink_path());
    assert_eq!(sink.len(), 7);
    assert_eq!(
        sink[0],
        "pattern,trace,mapping,total_latency,bw_usage,avg_latency,mid_latency,read_req,write_req,ACT,PRE,RD"
    );
    let mut pairs = HashSet::new();
    let mut reader = csv::Reader::from_path(config.row_sink_path()).unwrap();
    for record in reader.records() {
        let record = record.unwrap();
        assert_eq!(record.len(), 12);
        assert!(pairs.insert((record[2].to_string(), record[0].to_string())));
        assert_eq!(record[1], format!("trace/{}.trace", &record[0]));
        assert_eq!(&record[3], "1000");
        assert_eq!(&record[5], "20");
        assert_eq!(&record[9], "0");
        assert_eq!(&record[11], "20");
    }
    assert_eq!(pairs.len(), 6);

    let report_lines = row_lines(&report);
    assert_eq!(report_lines.len(), 7);
    assert!(report_lines[1..]
        .iter()
        .all(|l| l.contains(",20.00,20.00,")));
    assert!(config.summary_path().exists());

    // every trial got its own directory
    for mapping in &config.mappings {
        for pattern in &config.traces {
            let dir = config.output_dir.join(mapping.as_str()).join(pattern.name());
            assert!(dir.join(format!("{}.yaml", pattern.name())).exists());
            assert!(dir.join("stdout.log").exists());
        }
    }
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn bandwidth_lands_in_the_row() {
    let root = scratch("bandwidth");
    // trace path "trace/b.trace" is 13 chars, so 113 reads
    let config = sweep_config(&root, &["m"], &["b"]);
    let outcome = run(&config, &FakeSimulator::healthy()).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { rows: 1, .. }));
    let mut reader = csv::Reader::from_path(config.row_sink_path()).unwrap();
    let record = reader.records().next().unwrap().unwrap();
    let bw: f64 = record[4].parse().unwrap();
    assert!((bw - (113.0 + 50.0) * 4.0 / 1000.0).abs() < 1e-12);
    let report = row_lines(&config.report_path());
    assert!(report[1].contains(",65.20%,"));
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn existing_output_dir_is_left_alone() {
    let root = scratch("exists");
    let config = sweep_config(&root, &["m1", "m2"], &["a"]);
    fs::create_dir_all(&config.output_dir).unwrap();
    let outcome = run(&config, &FakeSimulator::healthy()).unwrap();
    assert!(matches!(outcome, RunOutcome::OutputExists(_)));
    assert!(!config.row_sink_path().exists());
    assert!(!config.output_dir.join("m1").exists());
    assert_eq!(fs::read_dir(&config.output_dir).unwrap().count(), 0);
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn unreadable_base_config_stops_before_scheduling() {
    let root = scratch("badbase");
    let mut config = sweep_config(&root, &["m1"], &["a"]);
    config.base_config = root.join("missing.yaml");
    let err = run(&config, &FakeSimulator::healthy()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DseError>(),
        Some(DseError::ConfigLoad { .. })
    ));
    assert!(!config.output_dir.exists());
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn one_failing_mapping_fails_the_sweep_but_not_the_others() {
    let root = scratch("failing");
    let config = sweep_config(&root, &["broken", "healthy"], &["a", "b", "c"]);
    fs::create_dir_all(&config.output_dir).unwrap();
    let template = ConfigTemplate::load(&config.base_config).unwrap();
    let simulator = FakeSimulator {
        broken: vec!["broken".into()],
        garbled: vec![],
    };

    let log = RowLog::create(&config.row_sink_path(), &config.commands).unwrap();
    let (sender, writer) = RowWriter::spawn(log).unwrap();
    let outcome = run_sweep(&config, &template, &simulator, &sender).unwrap();
    drop(sender);
    assert_eq!(writer.finish().unwrap(), 3);

    assert_eq!(outcome.summary.ok_list.len(), 3);
    assert_eq!(outcome.summary.err_list, vec!["broken/a".to_string()]);
    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.trial_stage(), Some(TrialStage::Simulator));

    let sink = row_lines(&config.row_sink_path());
    assert_eq!(sink.len(), 4);
    assert!(sink[1..].iter().all(|l| l.contains(",healthy,")));
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn failing_sweep_reports_no_success() {
    let root = scratch("nosilent");
    let config = sweep_config(&root, &["broken", "healthy"], &["a"]);
    let simulator = FakeSimulator {
        broken: vec!["broken".into()],
        garbled: vec![],
    };
    let err = run(&config, &simulator).unwrap_err();
    let cause = err.downcast_ref::<DseError>().unwrap();
    assert_eq!(cause.trial_stage(), Some(TrialStage::Simulator));
    // the healthy row was still recorded, but no report was built
    assert_eq!(row_lines(&config.row_sink_path()).len(), 2);
    assert!(config.summary_path().exists());
    assert!(!config.report_path().exists());
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn garbled_counts_fail_at_parse_without_a_row() {
    let root = scratch("garbled");
    let config = sweep_config(&root, &["garbled"], &["a", "b"]);
    fs::create_dir_all(&config.output_dir).unwrap();
    let template = ConfigTemplate::load(&config.base_config).unwrap();
    let simulator = FakeSimulator {
        broken: vec![],
        garbled: vec!["garbled".into()],
    };
    let log = RowLog::create(&config.row_sink_path(), &config.commands).unwrap();
    let (sender, writer) = RowWriter::spawn(log).unwrap();
    let outcome = run_sweep(&config, &template, &simulator, &sender).unwrap();
    drop(sender);
    assert_eq!(writer.finish().unwrap(), 0);
    // the worker stops at its first failure
    assert_eq!(outcome.summary.err_list, vec!["garbled/a".to_string()]);
    assert!(outcome.summary.ok_list.is_empty());
    match outcome.error {
        Some(DseError::Trial { stage, source, .. }) => {
            assert_eq!(stage, TrialStage::Parse);
            assert!(matches!(*source, DseError::MalformedLog { .. }));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn stale_trial_directory_is_replaced() {
    let root = scratch("stale");
    let config = sweep_config(&root, &["m"], &["a"]);
    let stale = config.output_dir.join("m").join("a");
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("leftover.txt"), "old").unwrap();

    let template = ConfigTemplate::load(&config.base_config).unwrap();
    let log = RowLog::create(&config.row_sink_path(), &config.commands).unwrap();
    let (sender, writer) = RowWriter::spawn(log).unwrap();
    let outcome = run_sweep(&config, &template, &FakeSimulator::healthy(), &sender).unwrap();
    drop(sender);
    assert_eq!(writer.finish().unwrap(), 1);
    assert!(outcome.error.is_none());
    assert!(!stale.join("leftover.txt").exists());
    assert!(stale.join("a.csv").exists());
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn one_worker_still_covers_every_mapping() {
    let root = scratch("oneworker");
    let mut config = sweep_config(&root, &["m1", "m2", "m3"], &["a", "b"]);
    config.max_workers = 1;
    let outcome = run(&config, &FakeSimulator::healthy()).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { rows: 6, .. }));
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn auto_clean_removes_trial_logs() {
    let root = scratch("clean");
    let mut config = sweep_config(&root, &["m"], &["a"]);
    config.auto_clean = true;
    run(&config, &FakeSimulator::healthy()).unwrap();
    let dir = config.output_dir.join("m").join("a");
    assert!(!dir.join("a.csv").exists());
    assert!(!dir.join("a_issue_log_ch0.log").exists());
    assert!(dir.join("a_cmd_cnt.log").exists());
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn figures_are_drawn_for_every_trial() {
    let root = scratch("figures");
    let mut config = sweep_config(&root, &["m"], &["a", "b"]);
    config.plot = true;
    run(&config, &FakeSimulator::healthy()).unwrap();
    for pattern in ["a", "b"] {
        let dir = config.output_dir.join("m").join(pattern);
        assert!(dir.join(format!("{pattern}_latency_breakdown.png")).exists());
        assert!(dir.join(format!("{pattern}_cmd_interval.png")).exists());
    }
    // drawing again replaces the old figures
    assert_eq!(plot::finish_trials(&config).unwrap(), 0);
    fs::remove_dir_all(root).unwrap();
}

#[test]
fn auto_clean_runs_after_the_figures() {
    let root = scratch("figures_clean");
    let mut config = sweep_config(&root, &["m"], &["a"]);
    config.plot = true;
    config.auto_clean = true;
    run(&config, &FakeSimulator::healthy()).unwrap();
    let dir = config.output_dir.join("m").join("a");
    assert!(dir.join("a_latency_breakdown.png").exists());
    assert!(dir.join("a_cmd_interval.png").exists());
    assert!(!dir.join("a.csv").exists());
    assert!(!dir.join("a_issue_log_ch0.log").exists());
    fs::remove_dir_all(root).unwrap();
}
