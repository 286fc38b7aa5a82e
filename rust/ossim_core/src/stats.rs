use std::io::Write;

use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

/// Scheduler counters. Updated inside the scheduler's critical section;
/// callers get snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub nr_cpus: u64,
    pub nr_processes: u64,
    pub nr_ready: u64,
    pub nr_running: u64,
    pub nr_admissions: u64,
    pub nr_dispatches: u64,
    pub nr_idle_dispatches: u64,
    pub nr_preemptions: u64,
    pub nr_forced_preemptions: u64,
    pub nr_yields: u64,
    pub nr_wakeups: u64,
    pub nr_terminated: u64,
}

impl Metrics {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(
            w,
            "procs -> r: {:>2}/{:<2} q: {:<2} t: {:<2} | dispatch -> cs: {:<5} idle: {:<5} | preempt: {:<5} forced: {:<5} | yield: {:<5} wake: {:<5}",
            self.nr_running,
            self.nr_cpus,
            self.nr_ready,
            self.nr_terminated,
            self.nr_dispatches,
            self.nr_idle_dispatches,
            self.nr_preemptions,
            self.nr_forced_preemptions,
            self.nr_yields,
            self.nr_wakeups,
        )?;
        Ok(())
    }
}
