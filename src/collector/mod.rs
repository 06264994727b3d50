//! Metric collectors. Each one is a zero-argument operation over the
//! configuration that blocks until its measurement is done.

pub mod binsize;
pub mod build;
pub mod repo;
pub mod suite;
pub mod timing;
pub mod working_set;

use anyhow::Result;

use crate::config::Config;
use crate::metric::{MetricName, MetricValue};
use crate::registry::ReportRegistry;
use crate::suite::Scope;

pub trait Collector {
    fn collect(&self) -> Result<MetricValue>;
}

impl<F> Collector for F
where
    F: Fn() -> Result<MetricValue>,
{
    fn collect(&self) -> Result<MetricValue> {
        self()
    }
}

/// Register the built-in collector for every metric.
pub fn register_all<'a>(registry: &mut ReportRegistry<'a>, config: &'a Config) {
    registry.register(MetricName::Build, move || build::collect(config));
    registry.register(MetricName::Binsize, move || binsize::collect(config));
    registry.register(MetricName::Repo, move || repo::collect(config));
    registry.register(MetricName::Startup, move || timing::collect_startup(config));
    registry.register(MetricName::Throughput, move || {
        timing::collect_throughput(config)
    });
    registry.register(MetricName::WorkingSet, move || working_set::collect(config));
    for scope in Scope::ALL {
        registry.register(MetricName::suite(scope), move || {
            suite::SuiteRunner::new(config).collect(scope)
        });
    }
}
