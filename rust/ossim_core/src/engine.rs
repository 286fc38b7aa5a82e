//! The seams between the scheduler and its host.
//!
//! The simulator engine owns simulated time and the hardware abstraction.
//! It drives the scheduler through the callbacks on [`crate::Scheduler`] and
//! receives decisions through [`Engine`]. Neither trait is ever called with
//! the scheduler's lock held.

use crate::types::{CpuId, Pid, Ticks};

pub trait Engine: Send + Sync {
    /// Install `pid` on `cpu`, or the idle marker when `pid` is `None`.
    ///
    /// `timeslice` is how long the process may run before the engine should
    /// preempt it; `None` means until it blocks or terminates.
    fn context_switch(&self, cpu: CpuId, pid: Option<Pid>, timeslice: Option<Ticks>);

    /// Ask the engine to make `cpu` call [`crate::Scheduler::on_preempt`]
    /// soon, to take `victim` off it. The request is asynchronous: by the
    /// time it arrives `victim` may have left `cpu`, in which case the
    /// engine drops it. A context switch on `cpu` answers any request
    /// issued before it.
    fn force_preempt(&self, cpu: CpuId, victim: Pid);
}

/// A scheduling decision, reported to an attached [`SchedObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedEvent {
    Admitted { pid: Pid },
    Dispatched { cpu: CpuId, pid: Pid },
    Idle { cpu: CpuId },
    Preempted { cpu: CpuId, pid: Pid },
    Yielded { cpu: CpuId, pid: Pid },
    Terminated { cpu: CpuId, pid: Pid },
    Woken { pid: Pid },
    ForcePreempt { cpu: CpuId, victim: Pid, pid: Pid },
}

/// Optional hook for tracing scheduler activity. Not required for
/// correctness; events are delivered after the scheduler lock is dropped,
/// in per-callback order but unordered across threads.
pub trait SchedObserver: Send + Sync {
    fn event(&self, event: &SchedEvent);
}
