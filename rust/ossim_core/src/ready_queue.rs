//! The queue of READY processes.
//!
//! The queue is a plain data structure: it carries no lock of its own and
//! lives inside the scheduler's single critical section together with the
//! CPU slot table. Blocking until the queue is non-empty is done by the
//! scheduler on the condition variable paired with that lock.
//!
//! Each member is a [`Candidate`] snapshot taken at insertion time. A READY
//! process's priority is immutable and its cursor only moves while it is
//! owned by the engine, so the snapshot stays accurate for as long as the
//! process is queued.

use std::collections::VecDeque;
use std::fmt;

use crate::policy::{Candidate, Policy};
use crate::process::Process;
use crate::types::Pid;

#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: VecDeque<Candidate>,
    /// Monotonic insertion counter, the FIFO tie-break seed.
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_safety_check(&self, pid: Pid) {
        if cfg!(debug_assertions) && self.contains(pid) {
            panic!(
                "Invariant violation! Tried to add {} to the ready queue, but it's already present:\n{}",
                pid, self
            );
        }
    }

    /// Add `process` to the queue. Returns whether the queue was empty
    /// beforehand, in which case waiters must be signalled.
    pub fn insert(&mut self, process: &Process) -> bool {
        self.push_safety_check(process.pid());
        let was_empty = self.entries.is_empty();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(Candidate {
            pid: process.pid(),
            priority: process.priority(),
            next_burst: process.next_cpu_burst().unwrap_or(0),
            seq,
        });
        was_empty
    }

    /// Remove and return the member `policy` picks, or `None` if empty.
    pub fn try_take(&mut self, policy: Policy) -> Option<Pid> {
        let pid = policy.select(self.entries.iter())?.pid;
        let pos = self.entries.iter().position(|c| c.pid == pid)?;
        self.entries.remove(pos).map(|c| c.pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.iter().any(|c| c.pid == pid)
    }

    /// Members in insertion order.
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.entries.iter().map(|c| c.pid)
    }
}

impl fmt::Display for ReadyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ready queue, size={}, next_seq={}:", self.len(), self.next_seq)?;
        for c in self.entries.iter() {
            writeln!(
                f,
                "    {} prio={} next_burst={} seq={}",
                c.pid, c.priority, c.next_burst, c.seq
            )?;
        }
        Ok(())
    }
}
