use std::io::Write;

use anyhow::Result;
use ossim_core::{Metrics, Priority, Ticks};
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessReport {
    pub pid: u32,
    pub name: String,
    pub priority: Priority,
    pub cpu_ticks: Ticks,
    /// Ticks spent READY, waiting for a CPU.
    pub ready_ticks: Ticks,
    /// Tick at which the process terminated. All processes arrive at 0.
    pub turnaround: Option<Ticks>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub policy: String,
    pub nr_cpus: usize,
    pub elapsed: Ticks,
    pub completed: bool,
    /// Ticks each CPU spent running a process.
    pub busy_ticks: Vec<Ticks>,
    pub processes: Vec<ProcessReport>,
    pub metrics: Metrics,
}

impl Report {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(
            w,
            "{} on {} cpu(s): {} ticks{}",
            self.policy,
            self.nr_cpus,
            self.elapsed,
            if self.completed { "" } else { " (interrupted)" }
        )?;
        writeln!(
            w,
            "{:>4} {:<12} {:>4} {:>6} {:>6} {:>10}",
            "pid", "name", "prio", "cpu", "ready", "turnaround"
        )?;
        for p in self.processes.iter() {
            let turnaround = p
                .turnaround
                .map_or_else(|| "-".to_string(), |t| t.to_string());
            writeln!(
                w,
                "{:>4} {:<12} {:>4} {:>6} {:>6} {:>10}",
                p.pid, p.name, p.priority, p.cpu_ticks, p.ready_ticks, turnaround
            )?;
        }
        for (cpu, busy) in self.busy_ticks.iter().enumerate() {
            let util = match self.elapsed {
                0 => 0.0,
                elapsed => *busy as f64 * 100.0 / elapsed as f64,
            };
            writeln!(w, "cpu{}: busy {} ticks ({:.1}%)", cpu, busy, util)?;
        }
        self.metrics.format(w)
    }

    pub fn avg_turnaround(&self) -> Option<f64> {
        let done: Vec<Ticks> = self.processes.iter().filter_map(|p| p.turnaround).collect();
        if done.is_empty() {
            return None;
        }
        Some(done.iter().sum::<Ticks>() as f64 / done.len() as f64)
    }
}
