//! Renders the latest snapshot through a short-lived report server and
//! ships the page.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, Config};
use crate::handshake::{read_pid, remove_pid};
use crate::process::{ProcessTable, SystemTable};
use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to start report server: {0:#}")]
    Spawn(anyhow::Error),
    #[error("Timeout generating report")]
    Timeout,
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("transfer to {destination} failed: {reason:#}")]
    Transfer {
        destination: String,
        reason: anyhow::Error,
    },
}

pub trait ReportServer {
    fn stop(&mut self);
}

pub trait ServerLauncher {
    fn launch(&mut self) -> Result<Box<dyn ReportServer>>;
}

/// One GET against the report server: the body of a 2xx answer, `None`
/// for anything else, connection failures included.
pub trait Probe {
    fn probe(&mut self) -> Option<Vec<u8>>;
}

pub trait Transfer {
    fn send(&mut self, file: &Path, destination: &str) -> Result<()>;
}

#[derive(Debug)]
pub struct Published {
    pub artifact: Vec<u8>,
    pub local_path: PathBuf,
    /// Where the page ended up remotely; `None` when no transfer is set up.
    pub external_path: Option<String>,
}

/// Probe up to `attempts` times, sleeping `interval` before each try.
pub fn poll_for_report(
    probe: &mut dyn Probe,
    attempts: u32,
    interval: Duration,
) -> Result<Vec<u8>, PublishError> {
    for attempt in 1..=attempts {
        thread::sleep(interval);
        if let Some(body) = probe.probe() {
            debug!("report ready after {attempt} polls");
            return Ok(body);
        }
        debug!("report not ready ({attempt}/{attempts})");
    }
    Err(PublishError::Timeout)
}

pub struct Publisher<'a> {
    config: &'a Config,
    launcher: Box<dyn ServerLauncher + 'a>,
    probe: Box<dyn Probe + 'a>,
    transfer: Option<Box<dyn Transfer + 'a>>,
    table: Box<dyn ProcessTable + 'a>,
}

impl<'a> Publisher<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        let transfer: Option<Box<dyn Transfer + 'a>> = config
            .publish
            .transfer
            .clone()
            .map(|spec| Box::new(CommandTransfer { spec }) as Box<dyn Transfer + 'a>);
        Ok(Self {
            config,
            launcher: Box::new(ProcessServerLauncher::new(config)?),
            probe: Box::new(HttpProbe::new(config.report.port)?),
            transfer,
            table: Box::new(SystemTable::new()),
        })
    }

    pub fn with_parts(
        config: &'a Config,
        launcher: Box<dyn ServerLauncher + 'a>,
        probe: Box<dyn Probe + 'a>,
        transfer: Option<Box<dyn Transfer + 'a>>,
        table: Box<dyn ProcessTable + 'a>,
    ) -> Self {
        Self {
            config,
            launcher,
            probe,
            transfer,
            table,
        }
    }

    fn pid_file(&self) -> PathBuf {
        self.config.data_path(&self.config.publish.pid_file)
    }

    /// Render `snapshot` (the latest one on disk) and ship it.
    pub fn publish_latest(&mut self, snapshot: &Snapshot) -> Result<Published, PublishError> {
        let pid_file = self.pid_file();
        kill_recorded(self.table.as_mut(), &pid_file);

        info!("Generating report ...");
        let server = self.launcher.launch().map_err(PublishError::Spawn)?;
        let artifact = {
            let _guard = ServerGuard {
                server,
                pid_file: &pid_file,
                table: self.table.as_mut(),
            };
            poll_for_report(
                self.probe.as_mut(),
                self.config.publish.poll_attempts,
                Duration::from_millis(self.config.publish.poll_interval_ms),
            )?
        };

        let dir = &self.config.data_dir;
        let local_path = dir.join(format!("index-{}.html", snapshot.stamp()));
        let index = dir.join("index.html");
        write_file(&local_path, &artifact)?;
        write_file(&index, &artifact)?;
        info!("wrote {}", local_path.display());

        let external_path = match (&self.config.publish.destination, self.transfer.as_mut()) {
            (Some(destination), Some(transfer)) => {
                for file in [&local_path, &index] {
                    info!("Uploading {} to {destination} ...", file.display());
                    transfer
                        .send(file, destination)
                        .map_err(|reason| PublishError::Transfer {
                            destination: destination.clone(),
                            reason,
                        })?;
                }
                Some(remote_path(destination, &local_path))
            }
            _ => {
                debug!("no publish destination configured, keeping report local");
                None
            }
        };

        Ok(Published {
            artifact,
            local_path,
            external_path,
        })
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    std::fs::write(path, bytes).map_err(|source| PublishError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn remote_path(destination: &str, file: &Path) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if destination.ends_with('/') || destination.ends_with(':') {
        format!("{destination}{name}")
    } else {
        format!("{destination}/{name}")
    }
}

const SERVE_FLAG: &str = "--serve";

/// Kill the report server recorded in `pid_file`, if any, and remove the
/// file. A recorded pid whose process is not a report server (the pid was
/// reused after a crash) is left alone.
fn kill_recorded(table: &mut dyn ProcessTable, pid_file: &Path) {
    if let Some(pid) = read_pid(pid_file) {
        let is_server = table
            .snapshot()
            .iter()
            .any(|p| p.pid == pid && p.cmd_contains(SERVE_FLAG));
        if !is_server {
            debug!("pid {pid} from {} is not a report server", pid_file.display());
        } else if table.kill(pid) {
            warn!("killed stale report server {pid}");
        }
    }
    if let Err(e) = remove_pid(pid_file) {
        warn!("{e:#}");
    }
}

/// Stops the server on every exit path, unwinding included.
struct ServerGuard<'g> {
    server: Box<dyn ReportServer>,
    pid_file: &'g Path,
    table: &'g mut dyn ProcessTable,
}

impl Drop for ServerGuard<'_> {
    fn drop(&mut self) {
        self.server.stop();
        kill_recorded(self.table, self.pid_file);
    }
}

/// Runs this executable with `--serve`.
pub struct ProcessServerLauncher {
    exe: PathBuf,
    args: Vec<OsString>,
}

impl ProcessServerLauncher {
    pub fn new(config: &Config) -> Result<Self> {
        let exe = std::env::current_exe().context("failed to locate own executable")?;
        let mut args = vec![OsString::from(SERVE_FLAG)];
        if let Some(source) = &config.source {
            args.push("--config".into());
            args.push(source.into());
        }
        Ok(Self { exe, args })
    }
}

impl ServerLauncher for ProcessServerLauncher {
    fn launch(&mut self) -> Result<Box<dyn ReportServer>> {
        let child = Command::new(&self.exe)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run {}", self.exe.display()))?;
        Ok(Box::new(ChildServer { child }))
    }
}

struct ChildServer {
    child: Child,
}

impl ReportServer for ChildServer {
    fn stop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct HttpProbe {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(port: u16) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            url: format!("http://127.0.0.1:{port}/"),
        })
    }
}

impl Probe for HttpProbe {
    fn probe(&mut self) -> Option<Vec<u8>> {
        let response = match self.client.get(&self.url).send() {
            Ok(response) => response,
            Err(e) => {
                debug!("{}: {e}", self.url);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("{}: {}", self.url, response.status());
            return None;
        }
        response.bytes().ok().map(|b| b.to_vec())
    }
}

/// Runs `<program> <args...> <file> <destination>`.
pub struct CommandTransfer {
    spec: CommandSpec,
}

impl Transfer for CommandTransfer {
    fn send(&mut self, file: &Path, destination: &str) -> Result<()> {
        let status = self
            .spec
            .to_command()
            .arg(file)
            .arg(destination)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to run {}", self.spec.program))?;
        if !status.success() {
            anyhow::bail!("`{}` exited with {status}", self.spec.display());
        }
        Ok(())
    }
}
