use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use ossim_core::{Op, Pid, Priority, Process, ProcessTable, Ticks};
use serde::Deserialize;

/// A process as described in a workload file.
///
/// ```json
/// { "pid": 0, "name": "Montpelier", "priority": 5,
///   "ops": [{"cpu": 4}, {"io": 5}, {"cpu": 2}, "terminate"] }
/// ```
#[derive(Debug, Deserialize)]
pub struct ProcessDef {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub priority: Priority,
    pub ops: Vec<OpDef>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpDef {
    Cpu(Ticks),
    Io(Ticks),
    Terminate,
}

impl From<OpDef> for Op {
    fn from(op: OpDef) -> Self {
        match op {
            OpDef::Cpu(len) => Op::Cpu(len),
            OpDef::Io(len) => Op::Io(len),
            OpDef::Terminate => Op::Terminate,
        }
    }
}

pub fn load(path: &Path) -> Result<ProcessTable> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let defs: Vec<ProcessDef> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse workload {}", path.display()))?;
    let procs = defs
        .into_iter()
        .map(|d| {
            Process::new(
                Pid(d.pid),
                d.name,
                d.priority,
                d.ops.into_iter().map(Op::from).collect(),
            )
        })
        .collect::<Result<Vec<_>>>()?;
    ProcessTable::new(procs)
}

// (name, priority, alternating CPU/IO burst lengths)
const BUILTIN: [(&str, Priority, &[Ticks]); 8] = [
    (
        "Montpelier",
        5,
        &[
            4, 5, 2, 1, 2, 3, 5, 1, 2, 4, 2, 6, 2, 3, 2, 6, 3, 2, 4, 7, 3, 2, 9, 1, 4, 2, 3, 2, 4,
        ],
    ),
    (
        "Pierre",
        1,
        &[
            2, 3, 1, 5, 7, 3, 2, 1, 3, 8, 3, 1, 2, 3, 1, 5, 4, 2, 3, 2, 1, 6, 2, 3, 4, 2, 1,
        ],
    ),
    (
        "Hartford",
        6,
        &[
            2, 3, 4, 6, 2, 7, 2, 5, 3, 4, 2, 6, 4, 5, 1, 6, 2, 4, 2, 5, 1, 3, 2, 4, 4,
        ],
    ),
    (
        "Lansing",
        8,
        &[9, 1, 6, 1, 14, 1, 7, 1, 6, 12, 8, 1, 7, 1, 6, 1, 8, 1, 8],
    ),
    (
        "Helena",
        2,
        &[10, 1, 14, 2, 7, 2, 11, 1, 14, 1, 7, 14, 11, 1, 14, 1, 6, 2, 11],
    ),
    (
        "Concord",
        7,
        &[10, 1, 10, 3, 15, 1, 8, 1, 10, 2, 16, 1, 8, 1, 12, 2, 15, 3, 8],
    ),
    (
        "Trenton",
        3,
        &[7, 3, 11, 1, 15, 1, 11, 3, 10, 1, 14, 13, 11, 3, 19, 10, 14, 1, 11],
    ),
    (
        "Bismark",
        4,
        &[6, 3, 12, 3, 17, 1, 9, 1, 1, 3, 7, 1, 9, 4, 12, 3, 7, 1, 9],
    ),
];

/// The eight-process table the simulator ships with.
pub fn builtin() -> Result<ProcessTable> {
    let procs = BUILTIN
        .iter()
        .enumerate()
        .map(|(pid, (name, priority, bursts))| {
            let mut ops: Vec<Op> = bursts
                .iter()
                .enumerate()
                .map(|(i, len)| if i % 2 == 0 { Op::Cpu(*len) } else { Op::Io(*len) })
                .collect();
            ops.push(Op::Terminate);
            Process::new(Pid(pid as u32), *name, *priority, ops)
        })
        .collect::<Result<Vec<_>>>()?;
    ProcessTable::new(procs)
}
