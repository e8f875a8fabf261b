use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use super::{
    args::Args,
    plot,
    report::build_report,
    scheduler::{run_sweep, SweepOutcome, SweepSummary},
    settings::SweepConfig,
    sink::{RowLog, RowWriter},
    template::ConfigTemplate,
    trial::{ExternalSimulator, Simulator},
};
use crate::init_logger;
use clap::{Command, IntoApp};
use clap_complete::Generator;
use eyre::{Context, Result};
use tracing::{debug, error, info};

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    clap_complete::generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// what a finished run produced
#[derive(Debug)]
pub enum RunOutcome {
    /// the output folder was already there, nothing was touched
    OutputExists(PathBuf),
    Completed {
        summary: SweepSummary,
        rows: usize,
        report: PathBuf,
    },
}

pub fn main(args: Args) -> Result<()> {
    if let Some(generator) = args.generator {
        let mut cmd = Args::command();
        eprintln!("Generating completion file for {:?}...", generator);
        print_completions(generator, &mut cmd);
        return Ok(());
    }
    let mut settings_files = args.settings_files.clone();
    if settings_files.is_empty() {
        settings_files.push("configs/default.toml".into());
    }
    let config = SweepConfig::new(&settings_files, &args.overrides())
        .wrap_err("fail to create SweepConfig object")?;
    // the settings files and DSE_VERBOSE may turn on debug output too
    init_logger(config.verbose);
    debug!("{:?}", args);
    debug!("{:?}", config);

    let simulator = ExternalSimulator::new(&config.simulator);
    match run(&config, &simulator)? {
        RunOutcome::OutputExists(dir) => {
            println!("Folder {:?} already exists. Program exits.", dir);
        }
        RunOutcome::Completed { report, .. } => {
            println!("Program ends. Results can be checked at {:?}.", report);
        }
    }
    Ok(())
}

/// write `summary.json` for whatever ran, then surface the first failure:
/// the pool, the row writer, then the trials
fn settle(
    config: &SweepConfig,
    swept: crate::error::Result<SweepOutcome>,
    written: crate::error::Result<usize>,
) -> Result<(SweepSummary, usize)> {
    let outcome = swept?;
    serde_json::to_writer_pretty(
        File::create(config.summary_path()).wrap_err("fail to create summary file")?,
        &outcome.summary,
    )
    .wrap_err("fail to write summary")?;
    let rows = written.wrap_err("row writer failed")?;
    if let Some(e) = &outcome.error {
        error!("the list of trials failed: {:?}", outcome.summary.err_list);
        debug!("first failure: {:?}", e);
    }
    let summary = outcome.into_result().wrap_err("sweep failed")?;
    Ok((summary, rows))
}

/// one full sweep: guard, schedule, drain, report, then figures
pub fn run(config: &SweepConfig, simulator: &dyn Simulator) -> Result<RunOutcome> {
    if config.output_dir.exists() {
        return Ok(RunOutcome::OutputExists(config.output_dir.clone()));
    }
    let template = ConfigTemplate::load(&config.base_config).wrap_err("fail to load base config")?;
    fs::create_dir_all(&config.output_dir)
        .wrap_err(format!("fail to create {:?}", config.output_dir))?;
    info!("program starts, all logs are in {:?}", config.output_dir);

    let log = RowLog::create(&config.row_sink_path(), &config.commands)?;
    let (sender, writer) = RowWriter::spawn(log)?;
    let swept = run_sweep(config, &template, simulator, &sender);
    // the writer stops once the last sender is gone
    drop(sender);
    let written = writer.finish();
    let (summary, rows) = settle(config, swept, written)?;
    info!("the list of trials succeeded: {:?}", summary.ok_list);

    let report = config.report_path();
    build_report(&config.row_sink_path(), &report)?;

    // figures are single threaded and only drawn once every worker is done
    plot::finish_trials(config)?;
    Ok(RunOutcome::Completed {
        summary,
        rows,
        report,
    })
}
