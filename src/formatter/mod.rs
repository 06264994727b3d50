pub mod data;
pub mod html;
pub mod text;

use anyhow::Result;
use clap::ValueEnum;

use crate::config::Config;
use crate::metric::{MetricName, MetricValue};
use crate::snapshot::Snapshot;

/// Receives each value as the registry produces it, then the assembled
/// snapshot once a full run is done.
pub trait Reporter {
    fn metric(&mut self, name: MetricName, value: &MetricValue) -> Result<()>;

    fn finish(&mut self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReporterKind {
    /// Save the snapshot and publish the rendered report.
    #[default]
    Data,
    /// Print human-readable lines to stdout.
    Text,
}

pub fn create_reporter<'a>(
    kind: ReporterKind,
    config: &'a Config,
    publish: bool,
) -> Box<dyn Reporter + 'a> {
    match kind {
        ReporterKind::Data => Box::new(data::DataReporter::new(config, publish)),
        ReporterKind::Text => Box::new(text::TextReporter::new(std::io::stdout())),
    }
}

const MB: f64 = 1024.0 * 1024.0;

/// `x.xx s` under a minute, `x.xx m` otherwise, `No data` when absent.
pub fn format_time(seconds: Option<f64>) -> String {
    match seconds {
        Some(t) if t.abs() < 60.0 => format!("{t:.2} s"),
        Some(t) => format!("{:.2} m", t / 60.0),
        None => "No data".to_string(),
    }
}

pub fn mb(bytes: u64) -> f64 {
    bytes as f64 / MB
}

pub fn format_mb(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format!("{:.2} MB", mb(b)),
        None => "No data".to_string(),
    }
}

/// How many times faster the candidate is than the reference: positive
/// when the candidate is faster, negative when it is slower. `None` when
/// either time is not positive.
pub fn speedup(candidate: f64, reference: f64) -> Option<f64> {
    if candidate <= 0.0 || reference <= 0.0 {
        return None;
    }
    if candidate <= reference {
        Some(reference / candidate)
    } else {
        Some(-(candidate / reference))
    }
}

pub fn format_speedup(candidate: f64, reference: f64) -> String {
    match speedup(candidate, reference) {
        Some(x) => format!("{x:+.2}x"),
        None => "No data".to_string(),
    }
}

pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.2}%", r * 100.0),
        None => "No data".to_string(),
    }
}
