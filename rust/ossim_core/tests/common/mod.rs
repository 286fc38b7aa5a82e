#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;

use ossim_core::*;

static LOGGER: Once = Once::new();

/// Initialize test logging. Idempotent.
pub fn setup_test() {
    LOGGER.call_once(|| {
        let _ = simplelog::TestLogger::init(
            simplelog::LevelFilter::Debug,
            simplelog::Config::default(),
        );
    });
}

/// An engine that records every call it receives.
#[derive(Default)]
pub struct RecordingEngine {
    pub switches: Mutex<Vec<(CpuId, Option<Pid>, Option<Ticks>)>>,
    pub preempts: Mutex<Vec<(CpuId, Pid)>>,
}

impl RecordingEngine {
    pub fn switches(&self) -> Vec<(CpuId, Option<Pid>)> {
        self.switches
            .lock()
            .unwrap()
            .iter()
            .map(|(cpu, pid, _)| (*cpu, *pid))
            .collect()
    }

    pub fn preempts(&self) -> Vec<CpuId> {
        self.preempts
            .lock()
            .unwrap()
            .iter()
            .map(|(cpu, _)| *cpu)
            .collect()
    }
}

impl Engine for RecordingEngine {
    fn context_switch(&self, cpu: CpuId, pid: Option<Pid>, timeslice: Option<Ticks>) {
        self.switches.lock().unwrap().push((cpu, pid, timeslice));
    }

    fn force_preempt(&self, cpu: CpuId, victim: Pid) {
        self.preempts.lock().unwrap().push((cpu, victim));
    }
}

/// An observer that keeps every event.
#[derive(Default)]
pub struct EventLog(pub Mutex<Vec<SchedEvent>>);

impl SchedObserver for EventLog {
    fn event(&self, event: &SchedEvent) {
        self.0.lock().unwrap().push(*event);
    }
}

/// Build a process from alternating CPU/IO burst lengths, starting and
/// ending with a CPU burst.
pub fn process(pid: u32, priority: Priority, bursts: &[Ticks]) -> Process {
    let mut ops: Vec<Op> = bursts
        .iter()
        .enumerate()
        .map(|(i, len)| if i % 2 == 0 { Op::Cpu(*len) } else { Op::Io(*len) })
        .collect();
    ops.push(Op::Terminate);
    Process::new(Pid(pid), format!("proc{}", pid), priority, ops).unwrap()
}

pub fn scheduler(
    policy: Policy,
    nr_cpus: usize,
    procs: Vec<Process>,
) -> (Arc<Scheduler>, Arc<RecordingEngine>) {
    setup_test();
    let config = SchedConfig::new(policy, nr_cpus, None).unwrap();
    let table = Arc::new(ProcessTable::new(procs).unwrap());
    let engine = Arc::new(RecordingEngine::default());
    let sched = Arc::new(Scheduler::new(config, table, engine.clone()));
    (sched, engine)
}

/// Admit `pid` and dispatch it to the idle `cpu`. The ready queue must not
/// hold anything that outranks `pid`.
pub fn run_on(sched: &Scheduler, pid: u32, cpu: u32) {
    sched.admit(Pid(pid));
    sched.on_core_idle(CpuId(cpu));
    assert_eq!(sched.running(CpuId(cpu)), Some(Pid(pid)));
}

/// Take the process running on `cpu` through its current CPU burst and
/// into its following I/O burst.
pub fn start_io(sched: &Scheduler, cpu: u32) -> Pid {
    let pid = sched.running(CpuId(cpu)).expect("cpu is idle");
    let op = sched.table().get(pid).unwrap().advance();
    assert!(matches!(op, Op::Io(_)), "{} has no I/O burst next", pid);
    sched.on_yield(CpuId(cpu));
    pid
}

/// Finish the I/O burst of a WAITING process and wake it up.
pub fn finish_io(sched: &Scheduler, pid: Pid) {
    let op = sched.table().get(pid).unwrap().advance();
    assert!(op.is_cpu());
    sched.on_io_complete(pid);
}
