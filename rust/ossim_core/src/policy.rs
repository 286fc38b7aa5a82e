//! Selection policies.
//!
//! A policy is a pure ordering over ready candidates: whatever compares
//! lowest is dispatched first. Every ordering is total over distinct
//! candidates, so the dispatch order of two ready processes never depends
//! on queue internals.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;

use crate::types::{Pid, Priority, Ticks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// First-come-first-served, where arrival order is pid order.
    Fcfs,
    /// Static priority, higher first, FIFO among equals. Wake-ups may force
    /// the preemption of a lower priority process.
    Priority,
    /// Shortest next CPU burst first, pid order among equals.
    ShortestNextBurst,
}

impl Policy {
    /// Whether waking processes may force preemption of running ones.
    pub fn preempts_on_wakeup(self) -> bool {
        self == Policy::Priority
    }

    /// Compare two candidates. `Ordering::Less` means `a` runs before `b`.
    pub fn compare(self, a: &Candidate, b: &Candidate) -> Ordering {
        match self {
            Policy::Fcfs => a.pid.cmp(&b.pid),
            Policy::Priority => b
                .priority
                .cmp(&a.priority)
                .then_with(|| a.seq.cmp(&b.seq)),
            Policy::ShortestNextBurst => a
                .next_burst
                .cmp(&b.next_burst)
                .then_with(|| a.pid.cmp(&b.pid)),
        }
    }

    /// Pick the candidate to dispatch next, if any.
    pub fn select<'a, I>(self, candidates: I) -> Option<&'a Candidate>
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        candidates.into_iter().min_by(|a, b| self.compare(a, b))
    }
}

impl FromStr for Policy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fcfs" | "fifo" | "first-come-first-served" => Ok(Policy::Fcfs),
            "priority" | "prio" | "static-priority" => Ok(Policy::Priority),
            "sjf" | "snb" | "shortest-next-burst" => Ok(Policy::ShortestNextBurst),
            _ => bail!(
                "unknown scheduling policy {:?} (expected fcfs, static-priority or shortest-next-burst)",
                s
            ),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Policy::Fcfs => "fcfs",
            Policy::Priority => "static-priority",
            Policy::ShortestNextBurst => "shortest-next-burst",
        };
        f.write_str(s)
    }
}

/// What a policy sees of a ready process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub pid: Pid,
    pub priority: Priority,
    /// Length of the process's next CPU burst.
    pub next_burst: Ticks,
    /// Insertion sequence number in the ready queue; lower was queued earlier.
    pub seq: u64,
}
