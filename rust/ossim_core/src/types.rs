//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (PIDs, CPU IDs) prevent silent type confusion
//! between the two. Plain quantities (priorities, ticks) are type aliases.

use std::fmt;

/// Process identifier. Unique across a process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pid(pub u32);

/// Simulated CPU identifier, `0..nr_cpus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CpuId(pub u32);

impl CpuId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Static priority of a process. Higher is more urgent.
pub type Priority = u32;

/// Simulated time, in clock ticks.
pub type Ticks = u64;

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}
