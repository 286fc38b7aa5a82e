//! Dispatch order and lifecycle tests driven through the callback surface.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ossim_core::*;

mod common;
use common::*;

/// Run every ready process to completion on CPU 0, collecting the dispatch
/// order. Only works for single-burst workloads.
fn drain_order(sched: &Scheduler) -> Vec<Pid> {
    let mut order = vec![];
    sched.on_core_idle(CpuId(0));
    while let Some(pid) = sched.running(CpuId(0)) {
        order.push(pid);
        sched.table().get(pid).unwrap().advance();
        sched.on_terminate(CpuId(0));
    }
    order
}

#[test]
fn test_fcfs_dispatches_in_pid_order() {
    let (sched, _engine) = scheduler(
        Policy::Fcfs,
        1,
        vec![
            process(3, 9, &[1]),
            process(0, 1, &[5]),
            process(2, 0, &[1]),
            process(1, 5, &[9]),
        ],
    );
    // Admission order differs from pid order on purpose.
    for pid in [2, 3, 1, 0] {
        sched.admit(Pid(pid));
    }
    assert_eq!(drain_order(&sched), vec![Pid(0), Pid(1), Pid(2), Pid(3)]);
    assert!(sched.all_terminated());
}

#[test]
fn test_priority_dispatch_order() {
    let (sched, _engine) = scheduler(
        Policy::Priority,
        1,
        vec![
            process(0, 2, &[1]),
            process(1, 8, &[1]),
            process(2, 5, &[1]),
            process(3, 8, &[1]),
            process(4, 5, &[1]),
        ],
    );
    for pid in [4, 3, 0, 1, 2] {
        sched.admit(Pid(pid));
    }
    // Equal priorities go in admission order: 3 before 1, 4 before 2.
    assert_eq!(
        drain_order(&sched),
        vec![Pid(3), Pid(1), Pid(4), Pid(2), Pid(0)]
    );
}

#[test]
fn test_shortest_next_burst_dispatch_order() {
    let (sched, _engine) = scheduler(
        Policy::ShortestNextBurst,
        1,
        vec![
            process(0, 0, &[7]),
            process(1, 0, &[3]),
            process(2, 0, &[3]),
            process(3, 0, &[1]),
        ],
    );
    for pid in [2, 0, 3, 1] {
        sched.admit(Pid(pid));
    }
    assert_eq!(drain_order(&sched), vec![Pid(3), Pid(1), Pid(2), Pid(0)]);
}

#[test]
fn test_shortest_next_burst_uses_the_burst_after_io() {
    let (sched, _engine) = scheduler(
        Policy::ShortestNextBurst,
        1,
        vec![process(0, 0, &[1, 4, 9]), process(1, 0, &[5])],
    );
    run_on(&sched, 0, 0);
    let pid = start_io(&sched, 0);
    assert_eq!(sched.running(CpuId(0)), None);

    sched.admit(Pid(1));
    finish_io(&sched, pid);
    // pid 0 now wants 9 ticks, pid 1 wants 5.
    sched.on_core_idle(CpuId(0));
    assert_eq!(sched.running(CpuId(0)), Some(Pid(1)));
}

#[test]
fn test_fcfs_end_to_end_two_cpus() {
    let (sched, engine) = scheduler(
        Policy::Fcfs,
        2,
        vec![process(0, 0, &[2]), process(1, 0, &[2])],
    );
    sched.admit(Pid(1));
    sched.admit(Pid(0));
    sched.on_core_idle(CpuId(1));
    sched.on_core_idle(CpuId(0));
    assert_eq!(
        engine.switches(),
        vec![(CpuId(1), Some(Pid(0))), (CpuId(0), Some(Pid(1)))]
    );
    assert_eq!(sched.state(Pid(0)), ProcessState::Running);
    assert_eq!(sched.state(Pid(1)), ProcessState::Running);
    sched.check_invariants().unwrap();
}

#[test]
fn test_lifecycle_transitions() {
    let (sched, engine) = scheduler(Policy::Fcfs, 1, vec![process(0, 0, &[2, 3, 1])]);
    let pid = Pid(0);
    assert_eq!(sched.state(pid), ProcessState::New);

    sched.admit(pid);
    assert_eq!(sched.state(pid), ProcessState::Ready);
    assert_eq!(sched.nr_ready(), 1);

    sched.on_core_idle(CpuId(0));
    assert_eq!(sched.state(pid), ProcessState::Running);
    assert_eq!(sched.nr_ready(), 0);

    // Preempted with nothing else ready: it is dispatched right back.
    sched.on_preempt(CpuId(0));
    assert_eq!(sched.state(pid), ProcessState::Running);
    assert_eq!(sched.running(CpuId(0)), Some(pid));

    start_io(&sched, 0);
    assert_eq!(sched.state(pid), ProcessState::Waiting);
    assert_eq!(sched.running(CpuId(0)), None);
    assert_eq!(sched.nr_ready(), 0);

    finish_io(&sched, pid);
    assert_eq!(sched.state(pid), ProcessState::Ready);

    sched.on_core_idle(CpuId(0));
    sched.table().get(pid).unwrap().advance();
    sched.on_terminate(CpuId(0));
    assert_eq!(sched.state(pid), ProcessState::Terminated);
    assert_eq!(sched.running(CpuId(0)), None);
    assert!(sched.all_terminated());

    assert_eq!(
        engine.switches(),
        vec![
            (CpuId(0), Some(pid)),
            (CpuId(0), Some(pid)),
            (CpuId(0), None),
            (CpuId(0), Some(pid)),
            (CpuId(0), None),
        ]
    );

    let m = sched.metrics();
    assert_eq!(m.nr_admissions, 1);
    assert_eq!(m.nr_dispatches, 3);
    assert_eq!(m.nr_idle_dispatches, 2);
    assert_eq!(m.nr_preemptions, 1);
    assert_eq!(m.nr_yields, 1);
    assert_eq!(m.nr_wakeups, 1);
    assert_eq!(m.nr_terminated, 1);
    assert_eq!(m.nr_running, 0);
}

#[test]
fn test_timeslice_is_handed_to_the_engine() {
    setup_test();
    let config = SchedConfig::new(Policy::Fcfs, 1, Some(4)).unwrap();
    let table = Arc::new(ProcessTable::new(vec![process(0, 0, &[9])]).unwrap());
    let engine = Arc::new(RecordingEngine::default());
    let sched = Scheduler::new(config, table, engine.clone());

    sched.admit(Pid(0));
    sched.on_core_idle(CpuId(0));
    sched.table().get(Pid(0)).unwrap().advance();
    sched.on_terminate(CpuId(0));
    assert_eq!(
        *engine.switches.lock().unwrap(),
        vec![(CpuId(0), Some(Pid(0)), Some(4)), (CpuId(0), None, None)]
    );
}

#[test]
fn test_observer_sees_decisions() {
    setup_test();
    let config = SchedConfig::new(Policy::Fcfs, 1, None).unwrap();
    let table = Arc::new(ProcessTable::new(vec![process(0, 0, &[1, 1, 1])]).unwrap());
    let events = Arc::new(EventLog::default());
    let sched = Scheduler::new(config, table, Arc::new(RecordingEngine::default()))
        .with_observer(events.clone());

    run_on(&sched, 0, 0);
    let pid = start_io(&sched, 0);
    finish_io(&sched, pid);

    let cpu = CpuId(0);
    assert_eq!(
        *events.0.lock().unwrap(),
        vec![
            SchedEvent::Admitted { pid },
            SchedEvent::Dispatched { cpu, pid },
            SchedEvent::Yielded { cpu, pid },
            SchedEvent::Idle { cpu },
            SchedEvent::Woken { pid },
        ]
    );
}

#[test]
fn test_idle_cpus_block_until_work_arrives() {
    let (sched, engine) = scheduler(
        Policy::Fcfs,
        2,
        vec![process(0, 0, &[1]), process(1, 0, &[1])],
    );

    let handles: Vec<_> = (0..2)
        .map(|cpu| {
            let sched = sched.clone();
            thread::spawn(move || sched.on_core_idle(CpuId(cpu)))
        })
        .collect();

    // Give both threads a chance to park on the empty queue.
    thread::sleep(Duration::from_millis(50));
    assert!(engine.switches().is_empty());

    sched.admit(Pid(0));
    sched.admit(Pid(1));
    for h in handles {
        h.join().unwrap();
    }

    let mut running: Vec<_> = (0..2).filter_map(|cpu| sched.running(CpuId(cpu))).collect();
    running.sort();
    assert_eq!(running, vec![Pid(0), Pid(1)]);
    sched.check_invariants().unwrap();
}

#[test]
fn test_shutdown_releases_idle_cpus() {
    let (sched, engine) = scheduler(Policy::Fcfs, 3, vec![process(0, 0, &[1])]);

    let handles: Vec<_> = (0..3)
        .map(|cpu| {
            let sched = sched.clone();
            thread::spawn(move || sched.on_core_idle(CpuId(cpu)))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));

    sched.shutdown();
    for h in handles {
        h.join().unwrap();
    }
    assert!(sched.is_shut_down());
    assert!(engine.switches().is_empty());

    // Later idle calls return right away.
    sched.on_core_idle(CpuId(0));
    assert!(engine.switches().is_empty());
}

#[test]
#[should_panic(expected = "has no running process")]
fn test_preempt_idle_cpu_panics() {
    let (sched, _engine) = scheduler(Policy::Fcfs, 1, vec![process(0, 0, &[1])]);
    sched.on_preempt(CpuId(0));
}

#[test]
#[should_panic(expected = "out of range")]
fn test_cpu_out_of_range_panics() {
    let (sched, _engine) = scheduler(Policy::Fcfs, 2, vec![process(0, 0, &[1])]);
    sched.admit(Pid(0));
    sched.on_core_idle(CpuId(2));
}

#[test]
#[should_panic(expected = "expected WAITING")]
fn test_wakeup_of_ready_process_panics() {
    let (sched, _engine) = scheduler(Policy::Fcfs, 1, vec![process(0, 0, &[1])]);
    sched.admit(Pid(0));
    sched.on_io_complete(Pid(0));
}

#[test]
#[should_panic(expected = "terminated on cpu0 with operation Cpu(3)")]
fn test_terminate_before_terminal_operation_panics() {
    let (sched, _engine) = scheduler(Policy::Fcfs, 1, vec![process(0, 0, &[3])]);
    run_on(&sched, 0, 0);
    sched.on_terminate(CpuId(0));
}

#[test]
#[should_panic(expected = "reported idle while running")]
fn test_idle_while_running_panics() {
    let (sched, _engine) = scheduler(Policy::Fcfs, 1, vec![process(0, 0, &[3])]);
    run_on(&sched, 0, 0);
    sched.on_core_idle(CpuId(0));
}
