//! Conformance suites, run once per runtime and compared.

use std::ffi::OsString;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::{LogCache, LogKey};
use crate::config::Config;
use crate::log_parser;
use crate::metric::MetricValue;
use crate::process::run_logged;
use crate::suite::{Runtime, Scope, SuiteComparison, SuiteResult};

use super::build::ensure_built;

pub struct SuiteRunner<'a> {
    config: &'a Config,
    cache: LogCache,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self::with_cache(config, LogCache::new(&config.data_dir))
    }

    pub fn with_cache(config: &'a Config, cache: LogCache) -> Self {
        Self { config, cache }
    }

    pub fn cache(&self) -> &LogCache {
        &self.cache
    }

    /// Arguments after the runner program:
    /// `<runner args> <runtime flags> [-B<config>] --target=<binary> <scope>`.
    pub fn runner_args(&self, scope: Scope, runtime: Runtime) -> Vec<OsString> {
        let suite = &self.config.suite;
        let mut args: Vec<OsString> = suite.runner.args.iter().map(OsString::from).collect();
        args.extend(suite.flags(runtime).iter().map(OsString::from));
        if let Some(file) = &suite.config_file {
            let mut flag = OsString::from("-B");
            flag.push(file);
            args.push(flag);
        }
        let mut target = OsString::from("--target=");
        target.push(&self.config.runtime(runtime).binary);
        args.push(target);
        args.push(scope.as_str().into());
        args
    }

    /// The runner's combined output for `scope` on `runtime`. A cached log
    /// is reused without running anything.
    pub fn log_for(&self, scope: Scope, runtime: Runtime) -> Result<String> {
        let key = LogKey::new(scope, runtime);
        if let Some(text) = self.cache.get(key)? {
            debug!("reusing {}", self.cache.path(key).display());
            return Ok(text);
        }

        if runtime == Runtime::Candidate {
            ensure_built(self.config)?;
        }
        let staging = self.cache.staging_path(key)?;
        let mut cmd = self.config.suite.runner.to_command();
        cmd.args(self.runner_args(scope, runtime))
            .current_dir(&self.config.suite.dir);

        info!("Running {scope} suite with {runtime} ...");
        let status = run_logged(&mut cmd, &staging)
            .with_context(|| format!("{scope} suite on {runtime}"))?;
        // Failing specs make the runner exit non-zero; the log is still valid.
        if !status.success() {
            debug!("runner exited with {status}");
        }
        self.cache.commit(key)?;
        info!("done");

        self.cache
            .get(key)?
            .with_context(|| format!("log for {scope} suite on {runtime} vanished"))
    }

    pub fn run(&self, scope: Scope, runtime: Runtime) -> Result<Option<SuiteResult>> {
        let text = self.log_for(scope, runtime)?;
        let result = log_parser::parse(&text);
        if result.is_none() {
            warn!(
                "no summary in {}",
                self.cache.path(LogKey::new(scope, runtime)).display()
            );
        }
        Ok(result)
    }

    /// Candidate first, then reference, never concurrently.
    pub fn compare(&self, scope: Scope) -> Result<SuiteComparison> {
        let candidate = self.run(scope, Runtime::Candidate)?;
        let reference = self.run(scope, Runtime::Reference)?;
        Ok(SuiteComparison::new(candidate, reference))
    }

    pub fn collect(&self, scope: Scope) -> Result<MetricValue> {
        Ok(MetricValue::Suite(self.compare(scope)?))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::CommandSpec;

    const CANDIDATE_LOG: &str = "Finished in 10.0 seconds\n\n3 files, 30 examples, 100 expectations, 5 failures, 1 error\n";
    const REFERENCE_LOG: &str = "Finished in 4.0 seconds\n\n3 files, 31 examples, 110 expectations, 3 failures, 0 errors\n";

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.to_path_buf();
        config.build.output_dir = dir.to_path_buf();
        config.suite.runner = CommandSpec::new("/nonexistent/runner", &[]);
        config
    }

    #[test]
    fn runner_args_include_flags_target_and_scope() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.suite.runner = CommandSpec::new("mspec", &["run", "-fs"]);
        config.suite.config_file = Some(PathBuf::from("stats.config"));
        config.reference.binary = PathBuf::from("/usr/bin/ruby");
        let runner = SuiteRunner::new(&config);

        let args = runner.runner_args(Scope::Core, Runtime::Reference);
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["run", "-fs", "-Gruby", "-Bstats.config", "--target=/usr/bin/ruby", "core"]
        );
    }

    #[test]
    fn cached_logs_are_reused_without_running() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let runner = SuiteRunner::new(&config);
        runner
            .cache()
            .put(LogKey::new(Scope::Language, Runtime::Candidate), CANDIDATE_LOG)
            .unwrap();
        runner
            .cache()
            .put(LogKey::new(Scope::Language, Runtime::Reference), REFERENCE_LOG)
            .unwrap();

        let comparison = runner.compare(Scope::Language).unwrap();
        let delta = comparison.delta.unwrap();
        assert_eq!(delta.expectations, 10);
        assert_eq!(delta.failures, -2);
        assert_eq!(delta.errors, -1);
        assert_eq!(delta.seconds, -6.0);
    }

    #[test]
    fn log_without_summary_is_no_data_for_that_side() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let runner = SuiteRunner::new(&config);
        runner
            .cache()
            .put(LogKey::new(Scope::Core, Runtime::Candidate), "crashed while loading")
            .unwrap();
        runner
            .cache()
            .put(LogKey::new(Scope::Core, Runtime::Reference), REFERENCE_LOG)
            .unwrap();

        let comparison = runner.compare(Scope::Core).unwrap();
        assert!(comparison.candidate.is_none());
        assert!(comparison.reference.is_some());
        assert!(comparison.delta.is_none());
    }

    #[test]
    fn runner_that_cannot_start_is_an_error_and_leaves_no_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let runner = SuiteRunner::new(&config);
        assert!(runner.run(Scope::Library, Runtime::Reference).is_err());
        assert!(!runner.cache().contains(LogKey::new(Scope::Library, Runtime::Reference)));
    }

    #[cfg(unix)]
    #[test]
    fn fresh_run_is_cached_even_when_runner_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        let script = format!("printf '{}'; exit 1", REFERENCE_LOG.replace('\n', "\\n"));
        config.suite.runner = CommandSpec::new("sh", &["-c", &script]);
        let runner = SuiteRunner::new(&config);

        let result = runner.run(Scope::Core, Runtime::Reference).unwrap().unwrap();
        assert_eq!(result.expectations, 110);
        assert!(runner.cache().contains(LogKey::new(Scope::Core, Runtime::Reference)));
    }
}
