use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::suite::{Scope, SuiteComparison};

/// Identifier of one report. Declaration order is the order metrics appear
/// in a snapshot; execution order is decided by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Build,
    Binsize,
    Repo,
    Startup,
    Throughput,
    WorkingSet,
    SuiteLanguage,
    SuiteCore,
    SuiteLibrary,
}

impl MetricName {
    pub const ALL: [MetricName; 9] = [
        MetricName::Build,
        MetricName::Binsize,
        MetricName::Repo,
        MetricName::Startup,
        MetricName::Throughput,
        MetricName::WorkingSet,
        MetricName::SuiteLanguage,
        MetricName::SuiteCore,
        MetricName::SuiteLibrary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Build => "build",
            MetricName::Binsize => "binsize",
            MetricName::Repo => "repo",
            MetricName::Startup => "startup",
            MetricName::Throughput => "throughput",
            MetricName::WorkingSet => "working_set",
            MetricName::SuiteLanguage => "suite_language",
            MetricName::SuiteCore => "suite_core",
            MetricName::SuiteLibrary => "suite_library",
        }
    }

    /// Command-line spelling: `--suite-core` runs `suite_core`.
    pub fn flag(self) -> &'static str {
        match self {
            MetricName::Build => "build",
            MetricName::Binsize => "binsize",
            MetricName::Repo => "repo",
            MetricName::Startup => "startup",
            MetricName::Throughput => "throughput",
            MetricName::WorkingSet => "working-set",
            MetricName::SuiteLanguage => "suite-language",
            MetricName::SuiteCore => "suite-core",
            MetricName::SuiteLibrary => "suite-library",
        }
    }

    pub fn skip_flag(self) -> &'static str {
        match self {
            MetricName::Build => "skip-build",
            MetricName::Binsize => "skip-binsize",
            MetricName::Repo => "skip-repo",
            MetricName::Startup => "skip-startup",
            MetricName::Throughput => "skip-throughput",
            MetricName::WorkingSet => "skip-working-set",
            MetricName::SuiteLanguage => "skip-suite-language",
            MetricName::SuiteCore => "skip-suite-core",
            MetricName::SuiteLibrary => "skip-suite-library",
        }
    }

    /// Human-readable label used by the text and HTML reports.
    pub fn label(self) -> &'static str {
        match self {
            MetricName::Build => "Build time",
            MetricName::Binsize => "Binary size",
            MetricName::Repo => "Repository size",
            MetricName::Startup => "Startup time",
            MetricName::Throughput => "Throughput",
            MetricName::WorkingSet => "Working set",
            MetricName::SuiteLanguage => "Conformance (language)",
            MetricName::SuiteCore => "Conformance (core)",
            MetricName::SuiteLibrary => "Conformance (library)",
        }
    }

    pub fn suite(scope: Scope) -> Self {
        match scope {
            Scope::Language => MetricName::SuiteLanguage,
            Scope::Core => MetricName::SuiteCore,
            Scope::Library => MetricName::SuiteLibrary,
        }
    }

    pub fn scope(self) -> Option<Scope> {
        match self {
            MetricName::SuiteLanguage => Some(Scope::Language),
            MetricName::SuiteCore => Some(Scope::Core),
            MetricName::SuiteLibrary => Some(Scope::Library),
            _ => None,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        MetricName::ALL
            .into_iter()
            .find(|name| name.as_str() == normalized)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

/// Per-file sizes of the build output plus their sum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinarySizes {
    pub files: BTreeMap<String, u64>,
    pub total: u64,
}

impl BinarySizes {
    pub fn insert(&mut self, file: String, size: u64) {
        if let Some(previous) = self.files.insert(file, size) {
            self.total -= previous;
        }
        self.total += size;
    }
}

/// Average seconds per execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeTimings {
    pub candidate_compiled: f64,
    pub candidate_interpreted: f64,
    pub reference: f64,
    /// `reference - min(candidate_compiled, candidate_interpreted)`
    pub delta: f64,
}

impl ModeTimings {
    pub fn from_averages(compiled: f64, interpreted: f64, reference: f64) -> Self {
        Self {
            candidate_compiled: compiled,
            candidate_interpreted: interpreted,
            reference,
            delta: reference - compiled.min(interpreted),
        }
    }

    pub fn fastest_candidate(&self) -> f64 {
        self.candidate_compiled.min(self.candidate_interpreted)
    }
}

/// Value produced by one collector.
///
/// `NoData` means nothing was measured and must never be read as zero.
/// `Failed` means the collector itself broke; the message is kept so the
/// report can tell the two apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Seconds { value: f64 },
    Bytes { value: u64 },
    BinarySizes(BinarySizes),
    Timings(ModeTimings),
    Suite(SuiteComparison),
    NoData,
    Failed { reason: String },
}

impl MetricValue {
    pub fn seconds(value: f64) -> Self {
        MetricValue::Seconds { value }
    }

    pub fn bytes(value: u64) -> Self {
        MetricValue::Bytes { value }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        MetricValue::Failed {
            reason: reason.into(),
        }
    }

    pub fn as_seconds(&self) -> Option<f64> {
        match self {
            MetricValue::Seconds { value } => Some(*value),
            _ => None,
        }
    }

    /// Byte count of a plain byte metric or the total of a size breakdown.
    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            MetricValue::Bytes { value } => Some(*value),
            MetricValue::BinarySizes(sizes) => Some(sizes.total),
            _ => None,
        }
    }

    pub fn as_timings(&self) -> Option<&ModeTimings> {
        match self {
            MetricValue::Timings(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_suite(&self) -> Option<&SuiteComparison> {
        match self {
            MetricValue::Suite(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_measured(&self) -> bool {
        !matches!(self, MetricValue::NoData | MetricValue::Failed { .. })
    }
}
