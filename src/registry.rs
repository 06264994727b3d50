use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collector::{self, Collector};
use crate::config::Config;
use crate::formatter::Reporter;
use crate::metric::{MetricName, MetricValue};
use crate::snapshot::Snapshot;

/// What a registry run should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Metric(MetricName),
}

/// Values produced by a run, in execution order, plus the snapshot when the
/// whole registry ran.
#[derive(Debug, Default)]
pub struct RunOutput {
    pub results: Vec<(MetricName, MetricValue)>,
    pub snapshot: Option<Snapshot>,
}

pub struct ReportRegistry<'a> {
    collectors: Vec<(MetricName, Box<dyn Collector + 'a>)>,
    index: HashMap<MetricName, usize>,
    skipped: HashSet<MetricName>,
}

impl<'a> ReportRegistry<'a> {
    pub fn new() -> Self {
        Self {
            collectors: Vec::new(),
            index: HashMap::new(),
            skipped: HashSet::new(),
        }
    }

    /// Every built-in collector, bound to `config`.
    pub fn default_registry(config: &'a Config) -> Self {
        let mut registry = Self::new();
        collector::register_all(&mut registry, config);
        registry
    }

    /// Register `collector` under `name`, replacing an earlier registration
    /// in place.
    pub fn register(&mut self, name: MetricName, collector: impl Collector + 'a) {
        let boxed: Box<dyn Collector + 'a> = Box::new(collector);
        if let Some(&idx) = self.index.get(&name) {
            self.collectors[idx].1 = boxed;
            return;
        }
        self.index.insert(name, self.collectors.len());
        self.collectors.push((name, boxed));
    }

    /// Registered names in registration order, `build` moved to the front.
    pub fn discover(&self) -> Vec<MetricName> {
        let mut names: Vec<MetricName> = self.collectors.iter().map(|(n, _)| *n).collect();
        if let Some(pos) = names.iter().position(|n| *n == MetricName::Build) {
            let build = names.remove(pos);
            names.insert(0, build);
        }
        names
    }

    pub fn skip(&mut self, name: MetricName) {
        self.skipped.insert(name);
    }

    pub fn is_skipped(&self, name: MetricName) -> bool {
        self.skipped.contains(&name)
    }

    pub fn contains(&self, name: MetricName) -> bool {
        self.index.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run one collector. `None` when `name` is skipped or unregistered. A
    /// collector error becomes a failed marker and is logged; it never ends
    /// the run.
    pub fn run_metric(&self, name: MetricName) -> Option<MetricValue> {
        if self.is_skipped(name) {
            debug!("skipping {name}");
            return None;
        }
        let &idx = self.index.get(&name)?;
        let value = match self.collectors[idx].1.collect() {
            Ok(value) => value,
            Err(e) => {
                warn!("{name} failed: {e:#}");
                MetricValue::failed(format!("{e:#}"))
            }
        };
        Some(value)
    }

    /// Run `target`, feeding each value to `reporter`. Running everything
    /// also assembles a snapshot and hands it to the reporter's `finish`.
    pub fn run(&self, target: Target, reporter: &mut dyn Reporter) -> Result<RunOutput> {
        let mut output = RunOutput::default();
        match target {
            Target::Metric(name) => {
                if let Some(value) = self.run_metric(name) {
                    reporter.metric(name, &value)?;
                    output.results.push((name, value));
                } else if !self.contains(name) {
                    warn!("no collector registered for {name}");
                }
            }
            Target::All => {
                for name in self.discover() {
                    let Some(value) = self.run_metric(name) else {
                        continue;
                    };
                    reporter.metric(name, &value)?;
                    output.results.push((name, value));
                }
                let metrics: BTreeMap<MetricName, MetricValue> =
                    output.results.iter().cloned().collect();
                let snapshot = Snapshot::new(Utc::now(), metrics);
                info!("collected {} metrics", snapshot.metrics().len());
                reporter.finish(&snapshot)?;
                output.snapshot = Some(snapshot);
            }
        }
        Ok(output)
    }
}

impl Default for ReportRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}
