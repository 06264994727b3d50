use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use crate::config::{BinsizeConfig, Config};
use crate::metric::{BinarySizes, MetricValue};

use super::build::ensure_built;

pub fn collect(config: &Config) -> Result<MetricValue> {
    ensure_built(config)?;
    let sizes = measure(&config.build.output_dir, &config.binsize)?;
    Ok(MetricValue::BinarySizes(sizes))
}

/// Sizes of the shipped files directly inside `dir`.
pub fn measure(dir: &Path, patterns: &BinsizeConfig) -> Result<BinarySizes> {
    let include = build_globset(&patterns.include)?;
    let exclude = build_globset(&patterns.exclude)?;

    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut sizes = BinarySizes::default();
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !include.is_match(&name) || exclude.is_match(&name) {
            continue;
        }
        let len = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?
            .len();
        sizes.insert(name, len);
    }
    Ok(sizes)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob {pattern:?}"))?);
    }
    Ok(builder.build()?)
}
