//! Startup and throughput: the same program timed under every execution
//! mode, averaged over a fixed number of iterations.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::metric::{MetricValue, ModeTimings};

use super::build::ensure_built;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    CandidateCompiled,
    CandidateInterpreted,
    Reference,
}

impl Mode {
    pub const ALL: [Mode; 3] = [
        Mode::CandidateCompiled,
        Mode::CandidateInterpreted,
        Mode::Reference,
    ];

    pub fn command(self, config: &Config, program: &Path) -> Command {
        let mut cmd = match self {
            Mode::CandidateCompiled => config.candidate.command(),
            Mode::CandidateInterpreted => {
                let mut cmd = config.candidate.command();
                cmd.args(&config.candidate.interpret_args);
                cmd
            }
            Mode::Reference => config.reference.command(),
        };
        cmd.arg(program);
        cmd
    }
}

/// Run `measure` once per mode per iteration, modes interleaved, and
/// average each mode over the same `iterations`.
pub fn average_modes<F>(iterations: u32, mut measure: F) -> Result<ModeTimings>
where
    F: FnMut(Mode) -> Result<f64>,
{
    if iterations == 0 {
        anyhow::bail!("iteration count must be positive");
    }
    let mut sums = [0.0f64; 3];
    for i in 0..iterations {
        for (slot, mode) in Mode::ALL.into_iter().enumerate() {
            let seconds = measure(mode)?;
            debug!("iteration {i} {mode:?}: {seconds:.4} s");
            sums[slot] += seconds;
        }
    }
    let n = f64::from(iterations);
    Ok(ModeTimings::from_averages(sums[0] / n, sums[1] / n, sums[2] / n))
}

pub fn collect_startup(config: &Config) -> Result<MetricValue> {
    ensure_built(config)?;
    info!("Timing average startup (compiled, interpreted, reference) ...");
    let program = &config.bench.startup_program;
    let timings = average_modes(config.bench.iterations, |mode| {
        time_process(&mut mode.command(config, program))
    })?;
    info!("done");
    Ok(MetricValue::Timings(timings))
}

pub fn collect_throughput(config: &Config) -> Result<MetricValue> {
    ensure_built(config)?;
    info!("Timing average throughput (compiled, interpreted, reference) ...");
    let program = &config.bench.throughput_program;
    let timings = average_modes(config.bench.iterations, |mode| {
        reported_seconds(&mut mode.command(config, program))
    })?;
    info!("done");
    Ok(MetricValue::Timings(timings))
}

/// Wall-clock lifetime of one process.
fn time_process(cmd: &mut Command) -> Result<f64> {
    let start = Instant::now();
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("failed to run {:?}", cmd.get_program()))?;
    let seconds = start.elapsed().as_secs_f64();
    if !status.success() {
        anyhow::bail!("{:?} exited with {status}", cmd.get_program());
    }
    Ok(seconds)
}

/// Seconds the benchmark program measured itself and printed.
fn reported_seconds(cmd: &mut Command) -> Result<f64> {
    let output = cmd
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {:?}", cmd.get_program()))?;
    if !output.status.success() {
        anyhow::bail!("{:?} exited with {}", cmd.get_program(), output.status);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_reported_seconds(&stdout)
        .with_context(|| format!("no elapsed seconds in output {:?}", stdout.trim()))
}

/// The last line of `stdout` that is a plain number.
pub fn parse_reported_seconds(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| line.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
}
