//! Runs the full pipeline as a child process under a wall-clock deadline
//! and reclaims it when it hangs.
//!
//! Each attempt moves from idle to waiting on a deadline and ends either
//! completed or timed out. A timed-out attempt is retried after the
//! clean-up step until the retry budget is spent.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::process::{ProcessTable, SystemTable, kill_by_name, kill_tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    TimedOut,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start supervised run: {0:#}")]
    Start(anyhow::Error),
    #[error("clean-up before attempt {attempt} failed: {reason:#}")]
    Clean { attempt: u32, reason: anyhow::Error },
    #[error("lost track of supervised run: {0:#}")]
    Wait(anyhow::Error),
    #[error("hung too many times ({attempts} attempts)")]
    Exhausted { attempts: u32 },
}

/// A started operation the supervisor can poll and reclaim.
pub trait Running {
    type Exit;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> Result<Option<Self::Exit>>;

    /// Whether the live process table still shows the operation.
    fn still_running(&mut self) -> bool;

    /// Forcibly stop the operation and everything it spawned.
    fn terminate(&mut self);

    fn wait(&mut self) -> Result<Self::Exit>;
}

pub trait Supervised {
    type Handle: Running;

    fn start(&mut self, attempt: u32) -> Result<Self::Handle>;
}

/// Poll `op` until it exits or `deadline` passes.
///
/// At the deadline the process table is consulted: an operation that is
/// gone counts as completed. One that is still there is terminated, which
/// kills it and its descendants, and the attempt is `TimedOut`.
pub fn run_with_deadline<R: Running>(
    op: &mut R,
    deadline: Instant,
    poll: Duration,
) -> Result<Outcome<R::Exit>> {
    loop {
        if let Some(exit) = op.try_wait()? {
            return Ok(Outcome::Completed(exit));
        }
        let now = Instant::now();
        if now >= deadline {
            if op.still_running() {
                op.terminate();
                return Ok(Outcome::TimedOut);
            }
            return op.wait().map(Outcome::Completed);
        }
        thread::sleep(poll.min(deadline - now));
    }
}

pub struct Supervisor {
    pub timeout: Duration,
    pub max_retries: u32,
    pub poll: Duration,
}

impl Supervisor {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            poll: config.poll_interval(),
        }
    }

    /// Run `op` with up to `max_retries` retries. `clean` runs before every
    /// attempt. Only an operation that exits ends the loop early, whatever
    /// its exit value.
    pub fn supervise<S, C>(
        &self,
        op: &mut S,
        mut clean: C,
    ) -> Result<<S::Handle as Running>::Exit, SupervisorError>
    where
        S: Supervised,
        C: FnMut() -> Result<()>,
    {
        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            clean().map_err(|reason| SupervisorError::Clean { attempt, reason })?;
            info!("attempt {} of {attempts}", attempt + 1);
            let mut handle = op.start(attempt).map_err(SupervisorError::Start)?;
            let deadline = Instant::now() + self.timeout;
            match run_with_deadline(&mut handle, deadline, self.poll)
                .map_err(SupervisorError::Wait)?
            {
                Outcome::Completed(exit) => return Ok(exit),
                Outcome::TimedOut => {
                    warn!("run did not finish within {:.0?}, killed", self.timeout);
                }
            }
        }
        Err(SupervisorError::Exhausted { attempts })
    }
}

/// This executable re-run with `--all`.
pub struct PipelineRun {
    exe: PathBuf,
    args: Vec<OsString>,
    /// Runtime executable a killed run may leave behind.
    companion: Option<String>,
}

impl PipelineRun {
    pub fn new(forwarded: Vec<OsString>, companion: Option<String>) -> Result<Self> {
        let exe = std::env::current_exe().context("failed to locate own executable")?;
        let mut args = vec![OsString::from("--all")];
        args.extend(forwarded);
        Ok(Self {
            exe,
            args,
            companion,
        })
    }
}

impl Supervised for PipelineRun {
    type Handle = PipelineChild;

    fn start(&mut self, attempt: u32) -> Result<PipelineChild> {
        debug!("starting {} {:?} (attempt {attempt})", self.exe.display(), self.args);
        let child = Command::new(&self.exe)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run {}", self.exe.display()))?;
        Ok(PipelineChild {
            child,
            table: Box::new(SystemTable::new()),
            companion: self.companion.clone(),
        })
    }
}

pub struct PipelineChild {
    child: Child,
    table: Box<dyn ProcessTable>,
    companion: Option<String>,
}

impl Running for PipelineChild {
    type Exit = ExitStatus;

    fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    fn still_running(&mut self) -> bool {
        let pid = self.child.id();
        self.table
            .snapshot()
            .iter()
            .any(|p| p.pid == pid && p.cmd_contains("--all"))
    }

    fn terminate(&mut self) {
        let pid = self.child.id();
        let killed = kill_tree(self.table.as_mut(), pid);
        debug!("killed {killed} processes under {pid}");
        if let Some(name) = &self.companion {
            let killed = kill_by_name(self.table.as_mut(), name);
            if killed > 0 {
                warn!("killed {killed} leftover {name} processes");
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait()?)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Copy)]
    enum Behavior {
        /// Exits with this code on the n-th poll.
        ExitsAfter(u32, i32),
        Hangs,
        /// Never reports an exit, but is gone from the process table.
        Vanishes(i32),
    }

    #[derive(Default)]
    struct Counters {
        starts: Cell<u32>,
        terminations: Cell<u32>,
        cleans: Cell<u32>,
    }

    struct FakeOp {
        behavior: Behavior,
        counters: Rc<Counters>,
    }

    struct FakeHandle {
        behavior: Behavior,
        polls: u32,
        counters: Rc<Counters>,
    }

    impl Supervised for FakeOp {
        type Handle = FakeHandle;

        fn start(&mut self, _attempt: u32) -> Result<FakeHandle> {
            self.counters.starts.set(self.counters.starts.get() + 1);
            Ok(FakeHandle {
                behavior: self.behavior,
                polls: 0,
                counters: Rc::clone(&self.counters),
            })
        }
    }

    impl Running for FakeHandle {
        type Exit = i32;

        fn try_wait(&mut self) -> Result<Option<i32>> {
            self.polls += 1;
            Ok(match self.behavior {
                Behavior::ExitsAfter(n, code) if self.polls >= n => Some(code),
                _ => None,
            })
        }

        fn still_running(&mut self) -> bool {
            !matches!(self.behavior, Behavior::Vanishes(_))
        }

        fn terminate(&mut self) {
            self.counters
                .terminations
                .set(self.counters.terminations.get() + 1);
        }

        fn wait(&mut self) -> Result<i32> {
            match self.behavior {
                Behavior::Vanishes(code) | Behavior::ExitsAfter(_, code) => Ok(code),
                Behavior::Hangs => anyhow::bail!("wait on a hung process"),
            }
        }
    }

    fn supervisor(timeout: Duration) -> Supervisor {
        Supervisor {
            timeout,
            max_retries: 2,
            poll: Duration::from_millis(1),
        }
    }

    fn fake(behavior: Behavior) -> (FakeOp, Rc<Counters>) {
        let counters = Rc::new(Counters::default());
        (
            FakeOp {
                behavior,
                counters: Rc::clone(&counters),
            },
            counters,
        )
    }

    #[test]
    fn hanging_operation_exhausts_retries() {
        let (mut op, counters) = fake(Behavior::Hangs);
        let clean_counters = Rc::clone(&counters);
        let err = supervisor(Duration::ZERO)
            .supervise(&mut op, || {
                clean_counters.cleans.set(clean_counters.cleans.get() + 1);
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Exhausted { attempts: 3 }));
        assert!(err.to_string().contains("hung too many times"));
        assert_eq!(counters.starts.get(), 3);
        assert_eq!(counters.terminations.get(), 3);
        assert_eq!(counters.cleans.get(), 3);
    }

    #[test]
    fn completing_operation_runs_once() {
        let (mut op, counters) = fake(Behavior::ExitsAfter(3, 0));
        let exit = supervisor(Duration::from_secs(60))
            .supervise(&mut op, || Ok(()))
            .unwrap();
        assert_eq!(exit, 0);
        assert_eq!(counters.starts.get(), 1);
        assert_eq!(counters.terminations.get(), 0);
    }

    #[test]
    fn failing_exit_is_still_completion() {
        let (mut op, counters) = fake(Behavior::ExitsAfter(1, 3));
        let exit = supervisor(Duration::from_secs(60))
            .supervise(&mut op, || Ok(()))
            .unwrap();
        assert_eq!(exit, 3);
        assert_eq!(counters.starts.get(), 1);
    }

    #[test]
    fn vanished_process_at_deadline_is_not_a_timeout() {
        let (mut op, counters) = fake(Behavior::Vanishes(0));
        let mut handle = op.start(0).unwrap();
        let outcome = run_with_deadline(&mut handle, Instant::now(), Duration::from_millis(1))
            .unwrap();
        assert_eq!(outcome, Outcome::Completed(0));
        assert_eq!(counters.terminations.get(), 0);
    }

    #[test]
    fn deadline_timeout_terminates() {
        let (mut op, counters) = fake(Behavior::Hangs);
        let mut handle = op.start(0).unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let outcome = run_with_deadline(&mut handle, deadline, Duration::from_millis(2)).unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(counters.terminations.get(), 1);
        assert!(handle.polls > 1);
    }

    #[test]
    fn clean_failure_stops_before_starting() {
        let (mut op, counters) = fake(Behavior::ExitsAfter(1, 0));
        let err = supervisor(Duration::from_secs(1))
            .supervise(&mut op, || anyhow::bail!("permission denied"))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Clean { attempt: 0, .. }));
        assert_eq!(counters.starts.get(), 0);
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let (mut op, counters) = fake(Behavior::Hangs);
        let sup = Supervisor {
            max_retries: 0,
            ..supervisor(Duration::ZERO)
        };
        let err = sup.supervise(&mut op, || Ok(())).unwrap_err();
        assert!(matches!(err, SupervisorError::Exhausted { attempts: 1 }));
        assert_eq!(counters.starts.get(), 1);
    }
}
