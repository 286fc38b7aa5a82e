// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
mod sim;
use sim::Simulation;

mod stats;
mod workload;

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::info;
use log::trace;
use ossim_core::{Policy, SchedConfig, SchedEvent, SchedObserver, Ticks};

/// ossim: a multi-core CPU scheduler simulator.
///
/// Every process alternates CPU and I/O bursts until it terminates. One
/// thread per simulated CPU runs processes tick by tick and calls into the
/// scheduler whenever a CPU goes idle, a process starts I/O, terminates or
/// gets preempted; a clock thread completes I/O bursts.
///
/// Under the static priority policy, a process that becomes ready while
/// every CPU is busy forcibly preempts the lowest priority running process
/// if it is strictly more urgent.
#[derive(Debug, Parser)]
struct Opts {
    /// Number of simulated CPUs.
    #[clap(short = 'c', long, default_value = "1")]
    cpus: usize,

    /// Selection policy: fcfs, priority (static priority) or sjf
    /// (shortest next burst).
    #[clap(short = 'p', long, default_value = "fcfs")]
    policy: Policy,

    /// Time slice in ticks. A running process is preempted once it used
    /// its slice. Unset means processes run until their burst ends.
    #[clap(short = 's', long)]
    timeslice: Option<Ticks>,

    /// Real duration of one simulated tick, in microseconds.
    #[clap(short = 't', long, default_value = "100000")]
    tick_us: u64,

    /// Load the workload from a JSON file instead of the built-in one.
    #[clap(short = 'w', long)]
    workload: Option<PathBuf>,

    /// Print the final report as JSON.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    stats_json: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity:
    /// -v shows scheduling decisions and the per-tick CPU table, -vv every
    /// callback.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct LogObserver;

impl SchedObserver for LogObserver {
    fn event(&self, event: &SchedEvent) {
        trace!("event: {:?}", event);
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    if opts.tick_us == 0 {
        bail!("--tick-us must be positive");
    }
    let config = SchedConfig::new(opts.policy, opts.cpus, opts.timeslice)?;
    let table = match &opts.workload {
        Some(path) => workload::load(path)?,
        None => workload::builtin()?,
    };
    info!(
        "ossim: {} processes, {} ticks of CPU demand",
        table.len(),
        table.iter().map(|p| p.total_cpu()).sum::<Ticks>()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let mut sim = Simulation::new(config, table, Duration::from_micros(opts.tick_us));
    if opts.verbose > 1 {
        sim = sim.with_observer(Arc::new(LogObserver));
    }
    let report = sim.run(shutdown)?;

    let mut out = std::io::stdout().lock();
    if opts.stats_json {
        serde_json::to_writer_pretty(&mut out, &report).context("Failed to write the report")?;
        writeln!(out)?;
    } else {
        report.format(&mut out)?;
        if let Some(avg) = report.avg_turnaround() {
            writeln!(out, "average turnaround: {:.2} ticks", avg)?;
        }
    }

    if !report.completed {
        bail!("simulation interrupted before every process terminated");
    }
    Ok(())
}
