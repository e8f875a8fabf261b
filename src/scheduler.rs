use std::{fs, time::Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, info_span};

use crate::{
    error::{DseError, Result},
    settings::SweepConfig,
    sink::RowSink,
    template::ConfigTemplate,
    trial::{mapping_dir, Simulator, TrialExecutor},
    types::{MappingPolicy, TrialSpec},
};

/// which trials of a sweep finished and which did not
#[derive(Debug, Default, Serialize)]
pub struct SweepSummary {
    pub ok_list: Vec<String>,
    pub err_list: Vec<String>,
    pub elapsed_secs: f64,
}

/// a drained sweep: its summary plus the first trial failure, if any
#[derive(Debug)]
pub struct SweepOutcome {
    pub summary: SweepSummary,
    pub error: Option<DseError>,
}

impl SweepOutcome {
    /// fail the sweep as a whole when any trial failed
    pub fn into_result(self) -> Result<SweepSummary> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }
}

/// the outcome of one mapping's worker
#[derive(Debug)]
struct WorkerReport {
    done: Vec<String>,
    failed: Option<(String, DseError)>,
}

/// run every trace of one mapping, stopping at the first failed trial
fn run_mapping(executor: &TrialExecutor, config: &SweepConfig, mapping: &MappingPolicy) -> WorkerReport {
    let span = info_span!("worker", %mapping);
    let _entered = span.enter();
    let mut report = WorkerReport {
        done: vec![],
        failed: None,
    };
    let dir = mapping_dir(&config.output_dir, mapping);
    if let Err(e) = fs::create_dir_all(&dir) {
        report.failed = Some((mapping.to_string(), DseError::io(dir, e)));
        return report;
    }
    for pattern in &config.traces {
        let spec = TrialSpec::new(mapping, pattern);
        match executor.run(&spec) {
            Ok(_) => report.done.push(spec.to_string()),
            Err(e) => {
                error!("{spec}: {e}");
                report.failed = Some((spec.to_string(), e));
                break;
            }
        }
    }
    report
}

/// fan the sweep out over a bounded pool, one task per mapping.
///
/// every worker runs to completion even when another one fails; the first
/// failure in mapping order is kept in the outcome. only building the pool
/// fails this call directly.
pub fn run_sweep(
    config: &SweepConfig,
    template: &ConfigTemplate,
    simulator: &dyn Simulator,
    sink: &dyn RowSink,
) -> Result<SweepOutcome> {
    let start_time = Instant::now();
    let mut summary = SweepSummary::default();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_count())
        .thread_name(|i| format!("dse-worker-{i}"))
        .build()
        .map_err(|e| DseError::WorkerPool(e.to_string()))?;
    info!(
        mappings = config.mappings.len(),
        traces = config.traces.len(),
        workers = config.worker_count(),
        "sweep start"
    );

    let executor = TrialExecutor::new(config, template, simulator, sink);
    let reports: Vec<WorkerReport> = pool.install(|| {
        config
            .mappings
            .par_iter()
            .map(|mapping| run_mapping(&executor, config, mapping))
            .collect()
    });

    let mut first_error = None;
    for report in reports {
        summary.ok_list.extend(report.done);
        if let Some((name, e)) = report.failed {
            summary.err_list.push(name);
            first_error.get_or_insert(e);
        }
    }
    summary.elapsed_secs = start_time.elapsed().as_secs_f64();
    info!(
        ok = summary.ok_list.len(),
        failed = summary.err_list.len(),
        "execution time: {:.3}s",
        summary.elapsed_secs
    );
    Ok(SweepOutcome {
        summary,
        error: first_error,
    })
}
