//! Process records and the process table.
//!
//! A [`Process`] is created once at simulation start and is never copied.
//! Its identity, priority and operation list are immutable; the operation
//! cursor belongs to the simulator engine, which is the only party that
//! advances it. The scheduler-visible lifecycle state ([`ProcessState`]) is
//! kept by the scheduler under its own lock, see [`crate::Scheduler`].

use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use anyhow::bail;
use anyhow::Result;

use crate::types::{Pid, Priority, Ticks};

/// One entry of a process's operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Run on a CPU for the given number of ticks.
    Cpu(Ticks),
    /// Wait for I/O for the given number of ticks.
    Io(Ticks),
    /// End of the operation list.
    Terminate,
}

impl Op {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Op::Cpu(_))
    }
}

/// Lifecycle state of a process.
///
/// NEW -> READY -> RUNNING -> {READY | WAITING | TERMINATED}, WAITING -> READY.
/// TERMINATED is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    New,
    Ready,
    Running,
    Waiting,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::New => "NEW",
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Waiting => "WAITING",
            ProcessState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// A simulated process descriptor.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    name: String,
    priority: Priority,
    ops: Vec<Op>,
    /// Index of the operation being executed, or next to execute.
    cursor: AtomicUsize,
}

impl Process {
    /// Create a process record, validating its operation list.
    ///
    /// The list must alternate CPU and I/O bursts, start and end with a CPU
    /// burst, and be closed by a single [`Op::Terminate`]. Bursts must be
    /// non-empty.
    pub fn new(pid: Pid, name: impl Into<String>, priority: Priority, ops: Vec<Op>) -> Result<Self> {
        let name = name.into();
        if ops.len() < 2 || ops.len() % 2 != 0 {
            bail!(
                "{} ({}): operation list must hold CPU/IO pairs closed by a CPU burst and a terminate marker, got {} entries",
                pid,
                name,
                ops.len()
            );
        }
        let last = ops.len() - 1;
        for (idx, op) in ops.iter().enumerate() {
            let valid = match op {
                Op::Cpu(len) => idx % 2 == 0 && idx != last && *len > 0,
                Op::Io(len) => idx % 2 == 1 && idx != last && *len > 0,
                Op::Terminate => idx == last,
            };
            if !valid {
                bail!("{} ({}): invalid operation {:?} at index {}", pid, name, op, idx);
            }
        }

        Ok(Self {
            pid,
            name,
            priority,
            ops,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn current_op(&self) -> Op {
        self.ops[self.cursor()]
    }

    /// Move the cursor to the next operation and return it.
    ///
    /// Only the simulator engine calls this, while it owns the process (on a
    /// CPU or in its I/O set).
    pub fn advance(&self) -> Op {
        let next = self.cursor.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            next < self.ops.len(),
            "{} advanced past its terminate marker",
            self.pid
        );
        self.ops[next]
    }

    /// Length of the next CPU burst, peeked from the cursor without moving it.
    pub fn next_cpu_burst(&self) -> Option<Ticks> {
        self.ops[self.cursor()..].iter().find_map(|op| match op {
            Op::Cpu(len) => Some(*len),
            _ => None,
        })
    }

    /// Whether the cursor sits on the terminate marker.
    pub fn at_terminal(&self) -> bool {
        self.current_op() == Op::Terminate
    }

    /// Total CPU demand over the whole operation list.
    pub fn total_cpu(&self) -> Ticks {
        self.ops
            .iter()
            .map(|op| match op {
                Op::Cpu(len) => *len,
                _ => 0,
            })
            .sum()
    }
}

/// The immutable set of processes of one simulation, ordered by pid.
#[derive(Debug)]
pub struct ProcessTable {
    procs: Vec<Process>,
}

impl ProcessTable {
    pub fn new(mut procs: Vec<Process>) -> Result<Self> {
        if procs.is_empty() {
            bail!("process table is empty");
        }
        procs.sort_by_key(|p| p.pid);
        for pair in procs.windows(2) {
            if pair[0].pid == pair[1].pid {
                bail!(
                    "duplicate {} ({} and {})",
                    pair[0].pid,
                    pair[0].name,
                    pair[1].name
                );
            }
        }
        Ok(Self { procs })
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter()
    }

    /// Position of `pid` in the table. Positions are stable for the lifetime
    /// of the table.
    pub fn index_of(&self, pid: Pid) -> Option<usize> {
        self.procs.binary_search_by_key(&pid, |p| p.pid).ok()
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.index_of(pid).map(|idx| &self.procs[idx])
    }
}
