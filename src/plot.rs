//! per trial figures, drawn after the sweep has drained.
//!
//! nothing here may run while workers are active: every figure is drawn
//! from the calling thread, one after another.

use std::{collections::BTreeMap, fs, path::Path};

use eyre::{Context, Result};
use itertools::Itertools;
use plotters::{coord::Shift, prelude::*};
use tracing::{debug, error, info};

use crate::{
    extract::{self, LatencyStats},
    settings::SweepConfig,
    trial::TrialPaths,
    types::TrialSpec,
};

/// intervals at or above this are collapsed into one bucket
pub const INTERVAL_CAP: u64 = 400;

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

/// `(label, count)` bars, sorted by value, with everything `>= cap` in a
/// trailing `>=cap` bar
pub fn interval_buckets(intervals: &[u64], cap: u64) -> Vec<(String, usize)> {
    let mut freq = BTreeMap::new();
    let mut over = 0;
    for &i in intervals {
        if i >= cap {
            over += 1;
        } else {
            *freq.entry(i).or_insert(0usize) += 1;
        }
    }
    let mut buckets = freq
        .into_iter()
        .map(|(v, c)| (v.to_string(), c))
        .collect_vec();
    if over > 0 {
        buckets.push((format!(">={cap}"), over));
    }
    buckets
}

/// bin width 1 below 20, otherwise a twentieth of the maximum
pub fn latency_buckets(values: &[f64]) -> Vec<(String, usize)> {
    let max = values.iter().copied().fold(0.0_f64, f64::max).max(0.0) as u64;
    let width = if max < 20 { 1 } else { max / 20 };
    let mut bins = vec![0usize; (max / width + 1) as usize];
    for &v in values {
        let v = v.max(0.0) as u64;
        bins[(v / width) as usize] += 1;
    }
    bins.into_iter()
        .enumerate()
        .map(|(i, c)| ((i as u64 * width).to_string(), c))
        .collect()
}

/// exact value frequencies, for small discrete columns
fn value_buckets(values: &[f64]) -> Vec<(String, usize)> {
    values
        .iter()
        .map(|v| v.round() as i64)
        .counts()
        .into_iter()
        .sorted()
        .map(|(v, c)| (v.to_string(), c))
        .collect()
}

/// `(clock, command)` pairs from a command trace, `clk, cmd, addr...` per line
pub fn parse_cmd_trace(text: &str) -> Result<Vec<(u64, String)>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            let mut fields = line.split(',').map(str::trim);
            let clk = fields
                .next()
                .and_then(|c| c.parse::<u64>().ok())
                .ok_or_else(|| eyre::eyre!("line {}: no clock in `{line}`", idx + 1))?;
            let cmd = fields
                .next()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| eyre::eyre!("line {}: no command in `{line}`", idx + 1))?;
            Ok((clk, cmd.to_string()))
        })
        .collect()
}

/// gaps between consecutive commands, and between consecutive `RD`s
pub fn command_intervals(events: &[(u64, String)]) -> (Vec<u64>, Vec<u64>) {
    let gaps = |clocks: Vec<u64>| {
        clocks
            .iter()
            .tuple_windows()
            .map(|(a, b)| b.saturating_sub(*a))
            .collect_vec()
    };
    let all = gaps(events.iter().map(|(c, _)| *c).collect());
    let rd = gaps(
        events
            .iter()
            .filter(|(_, cmd)| cmd == "RD")
            .map(|(c, _)| *c)
            .collect(),
    );
    (all, rd)
}

fn draw_bars(area: &Area, title: &str, x_desc: &str, buckets: &[(String, usize)]) -> Result<()> {
    if buckets.is_empty() {
        return Ok(());
    }
    let max = buckets.iter().map(|(_, c)| *c).max().unwrap_or(1);
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 16).into_font())
        .margin(8)
        .x_label_area_size(35)
        .y_label_area_size(45)
        .build_cartesian_2d((0..buckets.len()).into_segmented(), 0..max + max / 10 + 1)?;
    let label = |v: &SegmentValue<usize>| match v {
        SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
            buckets.get(*i).map(|(l, _)| l.clone()).unwrap_or_default()
        }
        SegmentValue::Last => String::new(),
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_desc)
        .y_desc("Frequency")
        .x_label_formatter(&label)
        .draw()?;
    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BLUE.mix(0.7).filled())
            .margin(1)
            .data(buckets.iter().enumerate().map(|(i, (_, c))| (i, *c))),
    )?;
    Ok(())
}

fn stats_title(name: &str, stats: Option<LatencyStats>) -> String {
    match stats {
        Some(s) => format!(
            "{name}  n={} mean={:.2} median={}",
            s.count, s.mean, s.median
        ),
        None => format!("{name}  n=0"),
    }
}

/// one histogram per access log column
pub fn draw_latency_breakdown(access_log: &Path, figure: &Path, note: &str) -> Result<()> {
    let columns = extract::access_log_columns(access_log)?;
    let root = BitMapBackend::new(figure, (2000, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(&note.replace('\n', "  |  "), ("sans-serif", 24).into_font())?;
    let rows = if columns.len() > 4 { 2 } else { 1 };
    let areas = root.split_evenly((rows, 4));
    for ((name, values), area) in columns.iter().zip(areas.iter()) {
        let stats = LatencyStats::from_values(values);
        let buckets = if name == "cmds" {
            value_buckets(values)
        } else {
            latency_buckets(values)
        };
        draw_bars(area, &stats_title(name, stats), "Latency", &buckets)?;
    }
    root.present()
        .wrap_err(format!("fail to write {figure:?}"))?;
    info!("output figure {:?}", figure);
    Ok(())
}

/// all-command and RD-only interval distributions of a command trace
pub fn draw_cmd_interval_distribution(cmd_trace: &Path, figure: &Path, note: &str) -> Result<()> {
    let text = fs::read_to_string(cmd_trace).wrap_err(format!("fail to read {cmd_trace:?}"))?;
    let events = parse_cmd_trace(&text).wrap_err(format!("bad command trace {cmd_trace:?}"))?;
    let (all, rd) = command_intervals(&events);

    let root = BitMapBackend::new(figure, (800, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let title = format!("Commands Interval Distribution  |  {}", note.replace('\n', "  |  "));
    let root = root.titled(&title, ("sans-serif", 20).into_font())?;
    let areas = root.split_evenly((2, 1));
    let as_f64 = |v: &[u64]| v.iter().map(|x| *x as f64).collect_vec();
    draw_bars(
        &areas[0],
        &stats_title("CMD interval", LatencyStats::from_values(&as_f64(&all))),
        "Interval/cycles",
        &interval_buckets(&all, INTERVAL_CAP),
    )?;
    draw_bars(
        &areas[1],
        &stats_title("RD interval", LatencyStats::from_values(&as_f64(&rd))),
        "Interval/cycles",
        &interval_buckets(&rd, INTERVAL_CAP),
    )?;
    root.present()
        .wrap_err(format!("fail to write {figure:?}"))?;
    info!("output figure {:?}", figure);
    Ok(())
}

fn replace_figure(figure: &Path) -> Result<()> {
    if figure.exists() {
        debug!("deleting {:?}", figure);
        fs::remove_file(figure).wrap_err(format!("fail to delete {figure:?}"))?;
    }
    Ok(())
}

fn remove_log(path: &Path) -> Result<()> {
    if path.exists() {
        debug!("[auto clean] deleting {:?}", path);
        fs::remove_file(path).wrap_err(format!("fail to delete {path:?}"))?;
    }
    Ok(())
}

/// figures (when enabled) and auto clean for every trial of the sweep,
/// strictly one trial at a time. returns the number of figures that failed.
pub fn finish_trials(config: &SweepConfig) -> Result<usize> {
    let mut failed = 0;
    if config.plot {
        info!("starting to draw figures...");
    }
    for mapping in &config.mappings {
        for pattern in &config.traces {
            let spec = TrialSpec::new(mapping, pattern);
            let paths = TrialPaths::new(&config.output_dir, &spec);
            let cmd_trace = paths.cmd_trace(0);
            if config.plot {
                let note = format!("{}\n{}", mapping, pattern.path().display());
                let latency_fig = paths.dir.join(format!("{}_latency_breakdown.png", pattern.name()));
                let interval_fig = paths.dir.join(format!("{}_cmd_interval.png", pattern.name()));
                replace_figure(&latency_fig)?;
                if let Err(e) = draw_latency_breakdown(&paths.access_log, &latency_fig, &note) {
                    error!("{spec}: latency breakdown: {e:?}");
                    failed += 1;
                }
                replace_figure(&interval_fig)?;
                if let Err(e) = draw_cmd_interval_distribution(&cmd_trace, &interval_fig, &note) {
                    error!("{spec}: command intervals: {e:?}");
                    failed += 1;
                }
            }
            if config.auto_clean {
                remove_log(&paths.access_log)?;
                remove_log(&cmd_trace)?;
            }
        }
    }
    if config.plot {
        info!(failed, "all figures are done");
    }
    Ok(failed)
}
