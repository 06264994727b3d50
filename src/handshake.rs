//! Pid-file handshake between a spawned helper and the process waiting on it.
//!
//! Writers go through a temp file and a rename so a reader sees either no
//! file or a complete pid. Readers still treat an empty or unparsable file
//! as "not ready yet".

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub fn write_pid(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, pid.to_string())
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to write {}", path.display()))
}

pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Poll for a readable pid until `timeout` elapses.
pub fn wait_for_pid(path: &Path, timeout: Duration, interval: Duration) -> Result<u32> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(pid) = read_pid(path) {
            return Ok(pid);
        }
        let now = Instant::now();
        if now >= deadline {
            anyhow::bail!(
                "no pid in {} after {:.0?}",
                path.display(),
                timeout
            );
        }
        thread::sleep(interval.min(deadline - now));
    }
}

pub fn remove_pid(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run/helper.pid");
        write_pid(&path, 4321).unwrap();
        assert_eq!(read_pid(&path), Some(4321));
        assert!(!path.with_extension("pid.tmp").exists());
    }

    #[test]
    fn empty_or_garbage_is_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pid");
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "").unwrap();
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "12ab").unwrap();
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, " 77\n").unwrap();
        assert_eq!(read_pid(&path), Some(77));
    }

    #[test]
    fn wait_times_out_with_message() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pid");
        let err = wait_for_pid(&path, Duration::from_millis(30), Duration::from_millis(5))
            .unwrap_err();
        assert!(err.to_string().contains("no pid in"));
    }

    #[test]
    fn wait_sees_pid_written_later() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pid");
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            write_pid(&writer_path, 99).unwrap();
        });
        let pid = wait_for_pid(&path, Duration::from_secs(5), Duration::from_millis(5)).unwrap();
        writer.join().unwrap();
        assert_eq!(pid, 99);
    }

    #[test]
    fn remove_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pid");
        remove_pid(&path).unwrap();
        write_pid(&path, 1).unwrap();
        remove_pid(&path).unwrap();
        assert!(!path.exists());
    }
}
