//! The simulated machine.
//!
//! [`Hardware`] is the engine side of the scheduler: it holds what each CPU
//! is executing, the processes doing I/O, and the simulated clock. One thread
//! per CPU executes processes tick by tick and calls back into the scheduler
//! when a burst ends, a time slice expires or a preemption was requested. A
//! clock thread advances time and completes I/O bursts.
//!
//! Time is lock-stepped: the clock does not start tick `t + 1` until every
//! busy CPU has run tick `t` and finished the callbacks it caused, so each
//! tick of CPU demand is consumed exactly once however the threads are
//! scheduled by the host.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use log::trace;
use log::warn;
use ossim_core::{
    CpuId, Engine, Op, Pid, ProcessTable, SchedConfig, SchedObserver, Scheduler, Ticks,
};

use crate::stats::{ProcessReport, Report};

#[derive(Debug, Default)]
struct CpuSlot {
    current: Option<Pid>,
    burst_left: Ticks,
    slice_left: Option<Ticks>,
    /// Outstanding forced preemption request. Only ever names `current`.
    preempt: Option<Pid>,
    busy_ticks: Ticks,
}

#[derive(Debug, Default, Clone, Copy)]
struct Ledger {
    ready_since: Option<Ticks>,
    ready_ticks: Ticks,
    finished_at: Option<Ticks>,
}

/// Per-CPU view of the clock.
#[derive(Debug, Default, Clone, Copy)]
struct CpuTick {
    busy: bool,
    /// Last tick this CPU has run, or the tick it was dispatched on.
    ran_through: Ticks,
}

#[derive(Debug, Default)]
struct Clock {
    now: Ticks,
    stopped: bool,
    cpus: Vec<CpuTick>,
}

impl Clock {
    fn all_acked(&self) -> bool {
        self.cpus
            .iter()
            .all(|c| !c.busy || c.ran_through >= self.now)
    }
}

/// What a CPU thread must do after running its process for one tick.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    BurstDone,
    Preempt,
}

pub struct Hardware {
    table: Arc<ProcessTable>,
    cpus: Vec<Mutex<CpuSlot>>,
    clock: Mutex<Clock>,
    /// Signaled when the clock moves or stops.
    tick_cv: Condvar,
    /// Signaled when a CPU finishes a tick.
    ack_cv: Condvar,
    /// Processes doing I/O, with the ticks left in their burst.
    io: Mutex<BTreeMap<Pid, Ticks>>,
    /// CPU time left in the current burst of preempted processes.
    saved_bursts: Mutex<BTreeMap<Pid, Ticks>>,
    ledger: Mutex<BTreeMap<Pid, Ledger>>,
}

impl Hardware {
    fn new(table: Arc<ProcessTable>, nr_cpus: usize) -> Self {
        let ledger = table.iter().map(|p| (p.pid(), Ledger::default())).collect();
        Self {
            table,
            cpus: (0..nr_cpus).map(|_| Mutex::new(CpuSlot::default())).collect(),
            clock: Mutex::new(Clock {
                cpus: vec![CpuTick::default(); nr_cpus],
                ..Default::default()
            }),
            tick_cv: Condvar::new(),
            ack_cv: Condvar::new(),
            io: Mutex::new(BTreeMap::new()),
            saved_bursts: Mutex::new(BTreeMap::new()),
            ledger: Mutex::new(ledger),
        }
    }

    fn now(&self) -> Ticks {
        self.clock.lock().unwrap().now
    }

    fn current(&self, cpu: CpuId) -> Option<Pid> {
        self.cpus[cpu.index()].lock().unwrap().current
    }

    /// Block until there is a tick `cpu` has not run yet and return it.
    /// `None` once stopped.
    fn wait_tick(&self, cpu: CpuId) -> Option<Ticks> {
        let clock = self.clock.lock().unwrap();
        let clock = self
            .tick_cv
            .wait_while(clock, |c| {
                c.now <= c.cpus[cpu.index()].ran_through && !c.stopped
            })
            .unwrap();
        if clock.stopped {
            None
        } else {
            Some(clock.now)
        }
    }

    /// `cpu` is done with tick `now`, callbacks included.
    fn ack_tick(&self, cpu: CpuId, now: Ticks) {
        let mut clock = self.clock.lock().unwrap();
        clock.cpus[cpu.index()].ran_through = now;
        self.ack_cv.notify_all();
    }

    /// Block until every busy CPU ran the current tick.
    fn wait_acks(&self) {
        let clock = self.clock.lock().unwrap();
        let _clock = self
            .ack_cv
            .wait_while(clock, |c| !c.all_acked() && !c.stopped)
            .unwrap();
    }

    /// Block until `nr` CPUs hold a process.
    fn wait_dispatched(&self, nr: usize) {
        let clock = self.clock.lock().unwrap();
        let _clock = self
            .ack_cv
            .wait_while(clock, |c| c.cpus.iter().filter(|t| t.busy).count() < nr)
            .unwrap();
    }

    fn advance_clock(&self) -> Ticks {
        let mut clock = self.clock.lock().unwrap();
        clock.now += 1;
        self.tick_cv.notify_all();
        clock.now
    }

    fn stop(&self) {
        let mut clock = self.clock.lock().unwrap();
        clock.stopped = true;
        self.tick_cv.notify_all();
        self.ack_cv.notify_all();
    }

    /// Run the process on `cpu` for one tick.
    fn run_tick(&self, cpu: CpuId) -> Step {
        let mut slot = self.cpus[cpu.index()].lock().unwrap();
        if slot.current.is_none() {
            return Step::Continue;
        }
        slot.busy_ticks += 1;
        slot.burst_left = slot.burst_left.saturating_sub(1);
        if slot.burst_left == 0 {
            slot.preempt = None;
            return Step::BurstDone;
        }
        if slot.preempt.take().is_some() {
            return Step::Preempt;
        }
        match slot.slice_left.as_mut() {
            Some(left) => {
                *left -= 1;
                if *left == 0 {
                    Step::Preempt
                } else {
                    Step::Continue
                }
            }
            None => Step::Continue,
        }
    }

    fn save_burst(&self, cpu: CpuId, pid: Pid) {
        let left = self.cpus[cpu.index()].lock().unwrap().burst_left;
        self.saved_bursts.lock().unwrap().insert(pid, left);
    }

    fn mark_ready(&self, pid: Pid, now: Ticks) {
        if let Some(l) = self.ledger.lock().unwrap().get_mut(&pid) {
            l.ready_since = Some(now);
        }
    }

    fn mark_finished(&self, pid: Pid, now: Ticks) {
        if let Some(l) = self.ledger.lock().unwrap().get_mut(&pid) {
            l.finished_at = Some(now);
        }
    }

    fn start_io(&self, pid: Pid, len: Ticks) {
        self.io.lock().unwrap().insert(pid, len);
    }

    /// Count down every I/O burst by one tick and return the finished ones.
    fn expire_io(&self) -> Vec<Pid> {
        let mut io = self.io.lock().unwrap();
        let mut done = vec![];
        for (pid, left) in io.iter_mut() {
            *left -= 1;
            if *left == 0 {
                done.push(*pid);
            }
        }
        for pid in done.iter() {
            io.remove(pid);
        }
        done
    }

    fn nr_io(&self) -> usize {
        self.io.lock().unwrap().len()
    }

    fn snapshot(&self) -> String {
        self.cpus
            .iter()
            .map(|c| match c.lock().unwrap().current {
                Some(pid) => format!("{:>4}", pid.0),
                None => "   -".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Engine for Hardware {
    fn context_switch(&self, cpu: CpuId, pid: Option<Pid>, timeslice: Option<Ticks>) {
        let now = {
            let mut clock = self.clock.lock().unwrap();
            let now = clock.now;
            let tick = &mut clock.cpus[cpu.index()];
            tick.busy = pid.is_some();
            tick.ran_through = now;
            self.ack_cv.notify_all();
            now
        };
        let burst = pid.map(|pid| {
            let saved = self.saved_bursts.lock().unwrap().remove(&pid);
            saved.unwrap_or_else(|| match self.table.get(pid).map(|p| p.current_op()) {
                Some(Op::Cpu(len)) => len,
                op => panic!("{} dispatched while at {:?}", pid, op),
            })
        });
        if let Some(pid) = pid {
            if let Some(l) = self.ledger.lock().unwrap().get_mut(&pid) {
                if let Some(since) = l.ready_since.take() {
                    l.ready_ticks += now - since;
                }
            }
        }

        let mut slot = self.cpus[cpu.index()].lock().unwrap();
        slot.current = pid;
        slot.burst_left = burst.unwrap_or(0);
        slot.slice_left = timeslice;
        // Every dispatch answers the requests issued before it.
        slot.preempt = None;
    }

    fn force_preempt(&self, cpu: CpuId, victim: Pid) {
        let mut slot = self.cpus[cpu.index()].lock().unwrap();
        if slot.current != Some(victim) {
            trace!("{}: dropping stale preemption of {}", cpu, victim);
            return;
        }
        slot.preempt = Some(victim);
    }
}

fn cpu_loop(sched: Arc<Scheduler>, hw: Arc<Hardware>, cpu: CpuId) {
    loop {
        let Some(pid) = hw.current(cpu) else {
            if sched.is_shut_down() {
                break;
            }
            sched.on_core_idle(cpu);
            continue;
        };

        let Some(now) = hw.wait_tick(cpu) else { break };
        match hw.run_tick(cpu) {
            Step::Continue => {}
            Step::Preempt => {
                hw.save_burst(cpu, pid);
                hw.mark_ready(pid, now);
                sched.on_preempt(cpu);
            }
            Step::BurstDone => match sched.table().get(pid).map(|p| p.advance()) {
                Some(Op::Io(len)) => {
                    sched.on_yield(cpu);
                    hw.start_io(pid, len);
                }
                Some(Op::Terminate) => {
                    hw.mark_finished(pid, now);
                    sched.on_terminate(cpu);
                }
                op => panic!("{} finished a CPU burst into {:?}", pid, op),
            },
        }
        hw.ack_tick(cpu, now);
    }
    debug!("{}: stopped", cpu);
}

fn clock_loop(sched: Arc<Scheduler>, hw: Arc<Hardware>, tick: Duration, shutdown: Arc<AtomicBool>) {
    loop {
        hw.wait_acks();
        if sched.all_terminated() {
            break;
        }
        if shutdown.load(Ordering::Relaxed) {
            warn!("simulation interrupted at tick {}", hw.now());
            break;
        }
        thread::sleep(tick);
        let now = hw.advance_clock();
        for pid in hw.expire_io() {
            if let Some(p) = sched.table().get(pid) {
                p.advance();
            }
            hw.mark_ready(pid, now);
            sched.on_io_complete(pid);
        }
        debug!(
            "{:>5} | ready {:>2} io {:>2} | {}",
            now,
            sched.nr_ready(),
            hw.nr_io(),
            hw.snapshot()
        );
    }
    hw.stop();
    sched.shutdown();
}

pub struct Simulation {
    config: SchedConfig,
    table: Arc<ProcessTable>,
    tick: Duration,
    observer: Option<Arc<dyn SchedObserver>>,
}

impl Simulation {
    pub fn new(config: SchedConfig, table: ProcessTable, tick: Duration) -> Self {
        Self {
            config,
            table: Arc::new(table),
            tick,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SchedObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run every process to completion, or until `shutdown` is raised.
    pub fn run(self, shutdown: Arc<AtomicBool>) -> Result<Report> {
        let hw = Arc::new(Hardware::new(self.table.clone(), self.config.nr_cpus()));
        let mut sched = Scheduler::new(self.config, self.table.clone(), hw.clone());
        if let Some(observer) = self.observer {
            sched = sched.with_observer(observer);
        }
        let sched = Arc::new(sched);

        for p in self.table.iter() {
            hw.mark_ready(p.pid(), 0);
            sched.admit(p.pid());
        }

        let mut handles = vec![];
        for cpu in self.config.cpus() {
            let (sched, hw) = (sched.clone(), hw.clone());
            let handle = thread::Builder::new()
                .name(format!("cpu{}", cpu.0))
                .spawn(move || cpu_loop(sched, hw, cpu))
                .with_context(|| format!("Failed to spawn the thread of {}", cpu))?;
            handles.push(handle);
        }
        // Everything arrives at tick 0: let the first dispatches land
        // before time starts.
        hw.wait_dispatched(self.table.len().min(self.config.nr_cpus()));
        let clock = {
            let (sched, hw, tick) = (sched.clone(), hw.clone(), self.tick);
            thread::Builder::new()
                .name("clock".into())
                .spawn(move || clock_loop(sched, hw, tick, shutdown))
                .context("Failed to spawn the clock thread")?
        };

        clock
            .join()
            .map_err(|_| anyhow!("clock thread panicked"))?;
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("cpu thread panicked"))?;
        }
        sched
            .check_invariants()
            .context("Scheduler state is inconsistent after the run")?;

        let elapsed = hw.now();
        info!(
            "simulation done: {}/{} processes terminated in {} ticks",
            sched.nr_terminated(),
            self.table.len(),
            elapsed
        );

        let ledger = hw.ledger.lock().unwrap();
        let processes = self
            .table
            .iter()
            .map(|p| {
                let l = ledger.get(&p.pid()).copied().unwrap_or_default();
                ProcessReport {
                    pid: p.pid().0,
                    name: p.name().to_string(),
                    priority: p.priority(),
                    cpu_ticks: p.total_cpu(),
                    ready_ticks: l.ready_ticks,
                    turnaround: l.finished_at,
                }
            })
            .collect();
        let busy_ticks = hw
            .cpus
            .iter()
            .map(|c| c.lock().unwrap().busy_ticks)
            .collect();

        Ok(Report {
            policy: self.config.policy().to_string(),
            nr_cpus: self.config.nr_cpus(),
            elapsed,
            completed: sched.all_terminated(),
            busy_ticks,
            processes,
            metrics: sched.metrics(),
        })
    }
}
