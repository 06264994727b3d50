//! Process-table access and child-process helpers shared by the collectors,
//! the supervisor and the publisher.

use std::fs::File;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmd: Vec<String>,
    /// Resident memory in bytes.
    pub memory: u64,
}

impl ProcessInfo {
    /// True when `needle` appears in the space-joined command line.
    pub fn cmd_contains(&self, needle: &str) -> bool {
        self.cmd.join(" ").contains(needle)
    }
}

pub trait ProcessTable {
    fn snapshot(&mut self) -> Vec<ProcessInfo>;

    /// Forcibly terminate `pid`. Returns false if no such process could be
    /// signalled.
    fn kill(&mut self, pid: u32) -> bool;
}

/// The live table, read through `sysinfo`.
pub struct SystemTable {
    system: System,
}

impl SystemTable {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()),
            ),
        }
    }
}

impl Default for SystemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemTable {
    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        self.system
            .processes()
            .values()
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                parent: p.parent().map(|pid| pid.as_u32()),
                name: p.name().to_string_lossy().into_owned(),
                cmd: p
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
                memory: p.memory(),
            })
            .collect()
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system.refresh_processes(
            sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
            true,
        );
        self.system
            .process(Pid::from_u32(pid))
            .is_some_and(|p| p.kill())
    }
}

/// Every transitive child of `root` in `table`, deepest first so that
/// killing in order never orphans a grandchild onto init.
pub fn descendants(table: &[ProcessInfo], root: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for p in table.iter().filter(|p| p.parent == Some(parent) && p.pid != root) {
            if !found.contains(&p.pid) {
                found.push(p.pid);
                frontier.push(p.pid);
            }
        }
    }
    found.reverse();
    found
}

/// Kill `root` and everything below it. Returns how many processes were
/// signalled.
pub fn kill_tree(table: &mut dyn ProcessTable, root: u32) -> usize {
    let rows = table.snapshot();
    let mut killed = 0;
    for pid in descendants(&rows, root) {
        if table.kill(pid) {
            killed += 1;
        }
    }
    if table.kill(root) {
        killed += 1;
    }
    killed
}

/// Kill every process whose executable name is `name`.
pub fn kill_by_name(table: &mut dyn ProcessTable, name: &str) -> usize {
    let targets: Vec<u32> = table
        .snapshot()
        .into_iter()
        .filter(|p| p.name.eq_ignore_ascii_case(name))
        .map(|p| p.pid)
        .collect();
    targets.into_iter().filter(|&pid| table.kill(pid)).count()
}

/// Run `cmd` to completion with stdout and stderr both appended to `log`.
pub fn run_logged(cmd: &mut Command, log: &Path) -> Result<ExitStatus> {
    let out = File::create(log).with_context(|| format!("failed to create {}", log.display()))?;
    let err = out
        .try_clone()
        .with_context(|| format!("failed to reopen {}", log.display()))?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .status()
        .with_context(|| format!("failed to run {:?}", cmd.get_program()))
}
