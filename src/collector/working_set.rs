//! Resident memory of an idle candidate runtime.
//!
//! The candidate runs a helper program that writes its own pid to a file
//! and then idles. After a warm-up the pid is read back and looked up in the
//! process table.

use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::handshake::{read_pid, remove_pid, wait_for_pid};
use crate::metric::MetricValue;
use crate::process::{ProcessTable, SystemTable};

use super::build::ensure_built;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Measured(u64),
    /// More than one table row carries the pid.
    Ambiguous(usize),
    Missing,
}

pub fn resident_memory(table: &mut dyn ProcessTable, pid: u32) -> Residency {
    let matches: Vec<u64> = table
        .snapshot()
        .into_iter()
        .filter(|p| p.pid == pid)
        .map(|p| p.memory)
        .collect();
    match matches.as_slice() {
        [] => Residency::Missing,
        [memory] => Residency::Measured(*memory),
        many => Residency::Ambiguous(many.len()),
    }
}

pub fn collect(config: &Config) -> Result<MetricValue> {
    ensure_built(config)?;
    let mut table = SystemTable::new();
    measure(config, &mut table)
}

pub fn measure(config: &Config, table: &mut dyn ProcessTable) -> Result<MetricValue> {
    config.ensure_data_dir()?;
    let ws = &config.working_set;
    let pid_file = config.data_path(&ws.pid_file);
    remove_pid(&pid_file)?;

    let mut cmd = config.candidate.command();
    cmd.arg(&ws.helper_program)
        .arg(&pid_file)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = cmd
        .spawn()
        .with_context(|| format!("failed to start {:?}", cmd.get_program()))?;
    let mut guard = HelperGuard {
        child,
        pid_file: pid_file.clone(),
        table,
    };

    info!(
        "Running for {} seconds to get working set ...",
        ws.warmup_secs
    );
    thread::sleep(Duration::from_secs(ws.warmup_secs));
    let pid = wait_for_pid(
        &pid_file,
        Duration::from_secs(ws.timeout_secs),
        Duration::from_millis(ws.poll_interval_ms),
    )
    .context("Timeout getting working set")?;
    debug!("helper pid {pid}");

    match resident_memory(&mut *guard.table, pid) {
        Residency::Measured(bytes) => {
            info!("done, {bytes} bytes");
            Ok(MetricValue::bytes(bytes))
        }
        Residency::Ambiguous(count) => {
            warn!("found {count} processes with pid {pid}; working set not recorded");
            Ok(MetricValue::NoData)
        }
        Residency::Missing => anyhow::bail!("helper process {pid} exited before measurement"),
    }
}

/// Kills the spawned runtime and the helper named in the pid file, then
/// removes the pid file, on every exit path.
struct HelperGuard<'t> {
    child: Child,
    pid_file: PathBuf,
    table: &'t mut dyn ProcessTable,
}

impl Drop for HelperGuard<'_> {
    fn drop(&mut self) {
        let child_pid = self.child.id();
        if let Some(pid) = read_pid(&self.pid_file).filter(|&pid| pid != child_pid) {
            self.table.kill(pid);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Err(e) = remove_pid(&self.pid_file) {
            warn!("{e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessInfo;
    use crate::process::fake::{FakeTable, row};

    fn with_memory(mut p: ProcessInfo, memory: u64) -> ProcessInfo {
        p.memory = memory;
        p
    }

    #[test]
    fn single_match_is_measured() {
        let mut table = FakeTable::with(vec![
            with_memory(row(7, None, "ir.exe", &[]), 40_000_000),
            with_memory(row(8, None, "ruby", &[]), 1),
        ]);
        assert_eq!(resident_memory(&mut table, 7), Residency::Measured(40_000_000));
    }

    #[test]
    fn duplicate_pid_is_ambiguous() {
        let mut table = FakeTable::with(vec![row(7, None, "a", &[]), row(7, None, "b", &[])]);
        assert_eq!(resident_memory(&mut table, 7), Residency::Ambiguous(2));
    }

    #[test]
    fn absent_pid_is_missing() {
        let mut table = FakeTable::default();
        assert_eq!(resident_memory(&mut table, 7), Residency::Missing);
    }

    #[cfg(target_os = "linux")]
    fn helper_config(dir: &std::path::Path, script: &str) -> Config {
        let helper = dir.join("helper.sh");
        std::fs::write(&helper, script).unwrap();
        let mut config = Config::default();
        config.data_dir = dir.join("data");
        config.candidate.binary = PathBuf::from("sh");
        config.candidate.args.clear();
        config.working_set.helper_program = helper;
        config.working_set.warmup_secs = 0;
        config.working_set.timeout_secs = 5;
        config.working_set.poll_interval_ms = 20;
        config
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn measures_live_helper_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let config = helper_config(tmp.path(), "echo $$ > \"$1\"\nexec sleep 30\n");
        let mut table = SystemTable::new();
        let value = measure(&config, &mut table).unwrap();
        assert!(value.as_bytes().unwrap() > 0);
        assert!(!config.data_path("pid").exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn missing_pid_file_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = helper_config(tmp.path(), "exec sleep 30\n");
        config.working_set.timeout_secs = 0;
        let mut table = FakeTable::default();
        let err = measure(&config, &mut table).unwrap_err();
        assert!(format!("{err:#}").contains("Timeout getting working set"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn ambiguous_pid_is_no_data() {
        let tmp = tempfile::tempdir().unwrap();
        let config = helper_config(tmp.path(), "echo 4242 > \"$1\"\nexec sleep 30\n");
        let mut table = FakeTable::with(vec![row(4242, None, "a", &[]), row(4242, None, "b", &[])]);
        let value = measure(&config, &mut table).unwrap();
        assert_eq!(value, MetricValue::NoData);
    }
}
