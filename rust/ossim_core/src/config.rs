use anyhow::bail;
use anyhow::Result;

use crate::policy::Policy;
use crate::types::{CpuId, Ticks};

/// Upper bound on the number of simulated CPUs.
pub const MAX_CPUS: usize = 512;

/// Startup configuration of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    policy: Policy,
    nr_cpus: usize,
    timeslice: Option<Ticks>,
}

impl SchedConfig {
    /// Validate and build a configuration. `timeslice` of `None` lets a
    /// dispatched process run until it blocks or is forcibly preempted.
    pub fn new(policy: Policy, nr_cpus: usize, timeslice: Option<Ticks>) -> Result<Self> {
        if nr_cpus == 0 {
            bail!("number of CPUs must be positive");
        }
        if nr_cpus > MAX_CPUS {
            bail!("number of CPUs {} exceeds the maximum of {}", nr_cpus, MAX_CPUS);
        }
        if timeslice == Some(0) {
            bail!("time slice must be positive");
        }
        Ok(Self {
            policy,
            nr_cpus,
            timeslice,
        })
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    pub fn timeslice(&self) -> Option<Ticks> {
        self.timeslice
    }

    pub fn cpus(&self) -> impl Iterator<Item = CpuId> {
        (0..self.nr_cpus as u32).map(CpuId)
    }
}
