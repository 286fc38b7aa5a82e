// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Scheduler core for the ossim multi-core process simulator
//!
//! This crate decides, for each simulated CPU, which runnable process
//! executes next. A host simulator engine owns simulated time and the
//! simulated hardware; it drives the scheduler through a small callback
//! surface and the scheduler answers through the [`Engine`] trait.
//!
//! - **Process records** ([`Process`], [`ProcessTable`]): immutable process
//!   descriptors with an engine-owned operation cursor.
//! - **Ready queue** ([`ReadyQueue`]): READY processes awaiting dispatch.
//! - **Policies** ([`Policy`]): first-come-first-served, static priority and
//!   shortest-next-burst selection.
//! - **Scheduler** ([`Scheduler`]): the ready queue and CPU slot table under
//!   one lock, the process state machine, and forced preemption.
//!
//! CPU threads call [`Scheduler::on_core_idle`], [`Scheduler::on_preempt`],
//! [`Scheduler::on_yield`] and [`Scheduler::on_terminate`] for their own CPU;
//! I/O completion is reported from any thread through
//! [`Scheduler::on_io_complete`].

mod config;
pub use config::SchedConfig;
pub use config::MAX_CPUS;

mod engine;
pub use engine::Engine;
pub use engine::SchedEvent;
pub use engine::SchedObserver;

mod policy;
pub use policy::Candidate;
pub use policy::Policy;

mod process;
pub use process::Op;
pub use process::Process;
pub use process::ProcessState;
pub use process::ProcessTable;

mod ready_queue;
pub use ready_queue::ReadyQueue;

mod scheduler;
pub use scheduler::Scheduler;

mod stats;
pub use stats::Metrics;

mod types;
pub use types::{CpuId, Pid, Priority, Ticks};
