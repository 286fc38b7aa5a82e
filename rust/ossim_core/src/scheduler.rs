// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The scheduler core.
//!
//! All scheduler-visible state (the ready queue, the CPU slot table and the
//! per-process lifecycle states) lives in one [`SchedState`] guarded by a
//! single mutex. The "ready queue is non-empty" condition is a condvar paired
//! with that mutex. Every callback runs one short critical section, then
//! hands its decision to the engine and the observer with the lock dropped:
//! the engine may block on its own locks, and a concurrent wake-up from
//! another thread must never wait behind it.
//!
//! # Ownership
//!
//! At any instant a process is a member of at most one container: the ready
//! queue (READY), one CPU slot (RUNNING), the engine's I/O set (WAITING), or
//! none (NEW, TERMINATED). Containers hold pids, records live in the shared
//! [`ProcessTable`], and moving between containers is a single mutation under
//! the lock. Debug builds re-verify the whole invariant after every mutation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

use anyhow::bail;
use anyhow::Result;
use log::debug;
use log::info;
use log::trace;

use crate::config::SchedConfig;
use crate::engine::{Engine, SchedEvent, SchedObserver};
use crate::process::{Process, ProcessState, ProcessTable};
use crate::ready_queue::ReadyQueue;
use crate::stats::Metrics;
use crate::types::{CpuId, Pid, Priority};

struct SchedState {
    ready: ReadyQueue,
    /// One entry per CPU: the RUNNING process, or `None` for idle.
    slots: Vec<Option<Pid>>,
    /// CPUs with an outstanding forced preemption request. Cleared as soon as
    /// the CPU calls back into the scheduler.
    preempt_pending: Vec<bool>,
    /// Lifecycle state of each process, indexed like the process table.
    states: Vec<ProcessState>,
    shutdown: bool,
    metrics: Metrics,
}

impl SchedState {
    fn transition(&mut self, table: &ProcessTable, pid: Pid, from: ProcessState, to: ProcessState) {
        let idx = table
            .index_of(pid)
            .unwrap_or_else(|| panic!("Invariant violation! Unknown {}", pid));
        let cur = self.states[idx];
        if cur != from {
            panic!(
                "Invariant violation! {} is {}, expected {} for a transition to {}:\n{}",
                pid, cur, from, to, self
            );
        }
        self.states[idx] = to;
    }

    /// Empty the slot of `cpu`, which must hold a running process.
    fn take_running(&mut self, cpu: CpuId, callback: &str) -> Pid {
        match self.slots[cpu.index()].take() {
            Some(pid) => pid,
            None => panic!(
                "Invariant violation! {} called on {}, which has no running process:\n{}",
                callback, cpu, self
            ),
        }
    }

    /// The CPU to forcibly preempt in favor of a process of `priority`.
    ///
    /// Nothing is preempted while any CPU is idle: the new process will be
    /// picked up by ordinary idle dispatch. Otherwise the victim is the
    /// lowest priority running process (lowest CPU index on ties), provided
    /// it is strictly less urgent. CPUs already asked to preempt are skipped.
    fn preemption_victim(&self, table: &ProcessTable, priority: Priority) -> Option<(CpuId, Pid)> {
        let mut victim: Option<(usize, Pid, Priority)> = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            let pid = (*slot)?;
            if self.preempt_pending[idx] {
                continue;
            }
            let prio = table.get(pid)?.priority();
            if victim.map_or(true, |(_, _, lowest)| prio < lowest) {
                victim = Some((idx, pid, prio));
            }
        }
        victim
            .filter(|(_, _, lowest)| *lowest < priority)
            .map(|(idx, pid, _)| (CpuId(idx as u32), pid))
    }

    fn count(&self, state: ProcessState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    /// Check that every process is in exactly the container its state
    /// implies, and in no other.
    fn verify(&self, table: &ProcessTable) -> Result<()> {
        let mut seen = BTreeSet::new();
        for pid in self.ready.pids() {
            if !seen.insert(pid) {
                bail!("{} is queued twice", pid);
            }
            match table.index_of(pid) {
                Some(idx) if self.states[idx] == ProcessState::Ready => {}
                Some(idx) => bail!("{} is queued but {}", pid, self.states[idx]),
                None => bail!("unknown {} is queued", pid),
            }
        }
        for (cpu, slot) in self.slots.iter().enumerate() {
            let Some(pid) = slot else {
                if self.preempt_pending[cpu] {
                    bail!("cpu{} is idle with a preemption pending", cpu);
                }
                continue;
            };
            if !seen.insert(*pid) {
                bail!("{} on cpu{} is also queued or on another CPU", pid, cpu);
            }
            match table.index_of(*pid) {
                Some(idx) if self.states[idx] == ProcessState::Running => {}
                Some(idx) => bail!("{} is on cpu{} but {}", pid, cpu, self.states[idx]),
                None => bail!("unknown {} is on cpu{}", pid, cpu),
            }
        }
        let nr_ready = self.count(ProcessState::Ready);
        if nr_ready != self.ready.len() {
            bail!(
                "{} processes are READY but {} are queued",
                nr_ready,
                self.ready.len()
            );
        }
        let nr_running = self.count(ProcessState::Running);
        let nr_occupied = self.slots.iter().filter(|s| s.is_some()).count();
        if nr_running != nr_occupied {
            bail!(
                "{} processes are RUNNING but {} CPUs are occupied",
                nr_running,
                nr_occupied
            );
        }
        if self.metrics.nr_terminated as usize != self.count(ProcessState::Terminated) {
            bail!("terminated count is out of sync with process states");
        }
        Ok(())
    }
}

/// A multi-line print of the scheduler state.
impl fmt::Display for SchedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scheduler state, shutdown={}:", self.shutdown)?;
        for (cpu, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(pid) => write!(f, "    cpu{}: {}", cpu, pid)?,
                None => write!(f, "    cpu{}: idle", cpu)?,
            }
            if self.preempt_pending[cpu] {
                write!(f, " (preempt pending)")?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", self.ready)?;
        write!(f, "States: {:?}", self.states)
    }
}

pub struct Scheduler {
    config: SchedConfig,
    table: Arc<ProcessTable>,
    engine: Arc<dyn Engine>,
    observer: Option<Arc<dyn SchedObserver>>,
    state: Mutex<SchedState>,
    nonempty: Condvar,
}

impl Scheduler {
    /// Create a scheduler with every process NEW and every CPU idle.
    pub fn new(config: SchedConfig, table: Arc<ProcessTable>, engine: Arc<dyn Engine>) -> Self {
        let metrics = Metrics {
            nr_cpus: config.nr_cpus() as u64,
            nr_processes: table.len() as u64,
            ..Default::default()
        };
        let state = SchedState {
            ready: ReadyQueue::new(),
            slots: vec![None; config.nr_cpus()],
            preempt_pending: vec![false; config.nr_cpus()],
            states: vec![ProcessState::New; table.len()],
            shutdown: false,
            metrics,
        };
        info!(
            "scheduler: policy={} cpus={} timeslice={} processes={}",
            config.policy(),
            config.nr_cpus(),
            config
                .timeslice()
                .map_or_else(|| "none".to_string(), |t| t.to_string()),
            table.len()
        );
        Self {
            config,
            table,
            engine,
            observer: None,
            state: Mutex::new(state),
            nonempty: Condvar::new(),
        }
    }

    /// Attach an observer that receives every scheduling decision.
    pub fn with_observer(mut self, observer: Arc<dyn SchedObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }

    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap()
    }

    fn process(&self, pid: Pid) -> &Process {
        self.table
            .get(pid)
            .unwrap_or_else(|| panic!("Invariant violation! Unknown {}", pid))
    }

    fn check_cpu(&self, cpu: CpuId) {
        if cpu.index() >= self.config.nr_cpus() {
            panic!(
                "Invariant violation! {} is out of range (nr_cpus={})",
                cpu,
                self.config.nr_cpus()
            );
        }
    }

    fn debug_verify(&self, st: &SchedState) {
        if cfg!(debug_assertions) {
            if let Err(e) = st.verify(&self.table) {
                panic!("Invariant violation! {}:\n{}", e, st);
            }
        }
    }

    fn emit(&self, event: SchedEvent) {
        if let Some(observer) = &self.observer {
            observer.event(&event);
        }
    }

    /// Make `process` READY and queue it, waking idle CPUs if the queue was
    /// empty.
    fn enqueue(&self, st: &mut SchedState, process: &Process) {
        if st.ready.insert(process) {
            self.nonempty.notify_all();
        }
    }

    /// Pick the next process for `cpu` and install it in the slot table.
    /// The caller hands the result to the engine once the lock is dropped.
    fn dispatch_locked(&self, st: &mut SchedState, cpu: CpuId) -> Option<Pid> {
        let next = st.ready.try_take(self.config.policy());
        match next {
            Some(pid) => {
                st.transition(&self.table, pid, ProcessState::Ready, ProcessState::Running);
                st.metrics.nr_dispatches += 1;
            }
            None => st.metrics.nr_idle_dispatches += 1,
        }
        st.slots[cpu.index()] = next;
        st.preempt_pending[cpu.index()] = false;
        self.debug_verify(st);
        next
    }

    /// Lock-free half of a dispatch: report what happened to the previous
    /// occupant of `cpu` and install `next` through the engine.
    fn hand_off(&self, cpu: CpuId, prev: Option<SchedEvent>, next: Option<Pid>) {
        if let Some(event) = prev {
            self.emit(event);
        }
        match next {
            Some(pid) => debug!("{}: dispatch {}", cpu, pid),
            None => trace!("{}: idle", cpu),
        }
        self.engine
            .context_switch(cpu, next, next.and(self.config.timeslice()));
        self.emit(match next {
            Some(pid) => SchedEvent::Dispatched { cpu, pid },
            None => SchedEvent::Idle { cpu },
        });
    }

    /// Move a NEW process into the ready queue.
    pub fn admit(&self, pid: Pid) {
        let process = self.process(pid);
        {
            let mut st = self.lock();
            st.transition(&self.table, pid, ProcessState::New, ProcessState::Ready);
            self.enqueue(&mut st, process);
            st.metrics.nr_admissions += 1;
            self.debug_verify(&st);
        }
        trace!("admit {}", pid);
        self.emit(SchedEvent::Admitted { pid });
    }

    /// Called by an idle CPU. Blocks until a process is READY, then
    /// dispatches it to `cpu`. Returns without dispatching once the
    /// scheduler is shut down.
    pub fn on_core_idle(&self, cpu: CpuId) {
        self.check_cpu(cpu);
        let mut st = self.lock();
        if let Some(pid) = st.slots[cpu.index()] {
            panic!(
                "Invariant violation! {} reported idle while running {}:\n{}",
                cpu, pid, st
            );
        }
        while st.ready.is_empty() && !st.shutdown {
            st = self.nonempty.wait(st).unwrap();
        }
        if st.shutdown {
            trace!("{}: idle after shutdown", cpu);
            return;
        }
        let next = self.dispatch_locked(&mut st, cpu);
        drop(st);

        self.hand_off(cpu, None, next);
    }

    /// The process running on `cpu` is preempted: it goes back to the ready
    /// queue and `cpu` is dispatched again.
    pub fn on_preempt(&self, cpu: CpuId) {
        self.check_cpu(cpu);
        let mut st = self.lock();
        let pid = st.take_running(cpu, "preempt");
        st.transition(&self.table, pid, ProcessState::Running, ProcessState::Ready);
        self.enqueue(&mut st, self.process(pid));
        st.metrics.nr_preemptions += 1;
        let next = self.dispatch_locked(&mut st, cpu);
        drop(st);

        debug!("{}: preempt {}", cpu, pid);
        self.hand_off(cpu, Some(SchedEvent::Preempted { cpu, pid }), next);
    }

    /// The process running on `cpu` starts an I/O burst. It leaves the slot
    /// table and is owned by the engine until [`Scheduler::on_io_complete`].
    pub fn on_yield(&self, cpu: CpuId) {
        self.check_cpu(cpu);
        let mut st = self.lock();
        let pid = st.take_running(cpu, "yield");
        st.transition(&self.table, pid, ProcessState::Running, ProcessState::Waiting);
        st.metrics.nr_yields += 1;
        let next = self.dispatch_locked(&mut st, cpu);
        drop(st);

        trace!("{}: yield {}", cpu, pid);
        self.hand_off(cpu, Some(SchedEvent::Yielded { cpu, pid }), next);
    }

    /// The process running on `cpu` reached its terminate marker.
    pub fn on_terminate(&self, cpu: CpuId) {
        self.check_cpu(cpu);
        let mut st = self.lock();
        let pid = st.take_running(cpu, "terminate");
        let process = self.process(pid);
        if !process.at_terminal() {
            panic!(
                "Invariant violation! {} terminated on {} with operation {:?} at cursor {}:\n{}",
                pid,
                cpu,
                process.current_op(),
                process.cursor(),
                st
            );
        }
        st.transition(&self.table, pid, ProcessState::Running, ProcessState::Terminated);
        st.metrics.nr_terminated += 1;
        let next = self.dispatch_locked(&mut st, cpu);
        let nr_terminated = st.metrics.nr_terminated;
        drop(st);

        debug!(
            "{}: terminate {} ({}/{} done)",
            cpu,
            pid,
            nr_terminated,
            self.table.len()
        );
        self.hand_off(cpu, Some(SchedEvent::Terminated { cpu, pid }), next);
    }

    /// The I/O burst of `pid` completed. The process becomes READY; under
    /// the static priority policy this may request a forced preemption,
    /// issued before returning.
    pub fn on_io_complete(&self, pid: Pid) {
        let process = self.process(pid);
        let mut st = self.lock();
        st.transition(&self.table, pid, ProcessState::Waiting, ProcessState::Ready);
        self.enqueue(&mut st, process);
        st.metrics.nr_wakeups += 1;
        let victim = if self.config.policy().preempts_on_wakeup() {
            st.preemption_victim(&self.table, process.priority())
        } else {
            None
        };
        if let Some((cpu, _)) = victim {
            st.preempt_pending[cpu.index()] = true;
            st.metrics.nr_forced_preemptions += 1;
        }
        self.debug_verify(&st);
        drop(st);

        trace!("wake {}", pid);
        self.emit(SchedEvent::Woken { pid });
        if let Some((cpu, running)) = victim {
            debug!(
                "{}: force preempt {} (prio {}) for {} (prio {})",
                cpu,
                running,
                self.process(running).priority(),
                pid,
                process.priority()
            );
            self.engine.force_preempt(cpu, running);
            self.emit(SchedEvent::ForcePreempt {
                cpu,
                victim: running,
                pid,
            });
        }
    }

    /// Release every CPU blocked in [`Scheduler::on_core_idle`]. Later idle
    /// calls return immediately.
    pub fn shutdown(&self) {
        let mut st = self.lock();
        st.shutdown = true;
        self.nonempty.notify_all();
        drop(st);
        info!("scheduler: shutdown");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown
    }

    pub fn state(&self, pid: Pid) -> ProcessState {
        let idx = self
            .table
            .index_of(pid)
            .unwrap_or_else(|| panic!("Invariant violation! Unknown {}", pid));
        self.lock().states[idx]
    }

    /// The process RUNNING on `cpu`, if any.
    pub fn running(&self, cpu: CpuId) -> Option<Pid> {
        self.check_cpu(cpu);
        self.lock().slots[cpu.index()]
    }

    pub fn nr_ready(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn nr_terminated(&self) -> usize {
        self.lock().metrics.nr_terminated as usize
    }

    pub fn all_terminated(&self) -> bool {
        self.nr_terminated() == self.table.len()
    }

    pub fn metrics(&self) -> Metrics {
        let st = self.lock();
        Metrics {
            nr_ready: st.ready.len() as u64,
            nr_running: st.slots.iter().filter(|s| s.is_some()).count() as u64,
            ..st.metrics.clone()
        }
    }

    /// Verify the single-owner invariant across the ready queue, the slot
    /// table and the process states.
    pub fn check_invariants(&self) -> Result<()> {
        self.lock().verify(&self.table)
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lock())
    }
}
