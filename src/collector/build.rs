use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::metric::MetricValue;
use crate::process::run_logged;

/// Build the candidate runtime and report the wall-clock seconds it took.
/// Compiler output goes to `<data>/compile.log`.
pub fn collect(config: &Config) -> Result<MetricValue> {
    let seconds = run_build(config)?;
    Ok(MetricValue::seconds(seconds))
}

/// Build only when the output directory does not exist yet.
pub fn ensure_built(config: &Config) -> Result<()> {
    if config.build.output_dir.is_dir() {
        debug!(
            "build output {} present, skipping build",
            config.build.output_dir.display()
        );
        return Ok(());
    }
    run_build(config).map(|_| ())
}

fn run_build(config: &Config) -> Result<f64> {
    config.ensure_data_dir()?;
    let log = config.data_path(&config.build.log_file);
    let mut cmd = config.build.command.to_command();
    cmd.current_dir(&config.build.dir);

    info!("Building candidate runtime ...");
    let start = Instant::now();
    let status = run_logged(&mut cmd, &log)
        .with_context(|| format!("build command `{}`", config.build.command.display()))?;
    let seconds = start.elapsed().as_secs_f64();

    if !status.success() {
        anyhow::bail!(
            "build failed with {status}; see {}",
            log.display()
        );
    }
    info!("done in {seconds:.2} s");
    Ok(seconds)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CommandSpec;

    fn config_in(dir: &std::path::Path, script: &str) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.join("data");
        config.build.dir = dir.to_path_buf();
        config.build.output_dir = dir.join("out");
        config.build.command = CommandSpec::new("sh", &["-c", script]);
        config
    }

    #[test]
    fn successful_build_reports_seconds_and_logs_output() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), "echo compiling; mkdir out");
        let value = collect(&config).unwrap();
        assert!(value.as_seconds().unwrap() >= 0.0);
        let log = std::fs::read_to_string(tmp.path().join("data/compile.log")).unwrap();
        assert!(log.contains("compiling"));
        assert!(tmp.path().join("out").is_dir());
    }

    #[test]
    fn failing_build_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), "echo broken 1>&2; exit 1");
        let err = collect(&config).unwrap_err();
        assert!(err.to_string().contains("build failed"));
    }

    #[test]
    fn ensure_built_skips_existing_output() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("out")).unwrap();
        let config = config_in(tmp.path(), "touch ran");
        ensure_built(&config).unwrap();
        assert!(!tmp.path().join("ran").exists());
    }

    #[test]
    fn ensure_built_builds_missing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), "touch ran; mkdir out");
        ensure_built(&config).unwrap();
        assert!(tmp.path().join("ran").exists());
    }
}
