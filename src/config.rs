use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::suite::Runtime;

/// Default configuration file, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "rtstats.yml";

/// Everything a run needs, loaded once from `rtstats.yml` and passed by
/// reference to the registry, collectors, supervisor, publisher and server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshots, logs, archives and pid files live here.
    pub data_dir: PathBuf,
    pub candidate: RuntimeConfig,
    pub reference: RuntimeConfig,
    pub build: BuildConfig,
    pub binsize: BinsizeConfig,
    pub repo: RepoConfig,
    pub bench: BenchConfig,
    pub working_set: WorkingSetConfig,
    pub suite: SuiteConfig,
    pub supervisor: SupervisorConfig,
    pub report: ReportConfig,
    pub publish: PublishConfig,
    /// File this config was read from, forwarded to child processes.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// An external program and its fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Space-joined form, used in log messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub binary: PathBuf,
    /// Arguments always passed before the program.
    pub args: Vec<String>,
    /// Extra arguments that switch the candidate into interpreted mode.
    pub interpret_args: Vec<String>,
    /// Executable name of processes this runtime may leave behind.
    pub process_name: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ruby"),
            args: Vec::new(),
            interpret_args: Vec::new(),
            process_name: None,
        }
    }
}

impl RuntimeConfig {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);
        cmd
    }

    pub fn process_name(&self) -> Option<&str> {
        self.process_name
            .as_deref()
            .or_else(|| self.binary.file_name().and_then(OsStr::to_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub command: CommandSpec,
    /// Working directory of the build command.
    pub dir: PathBuf,
    /// Directory holding the built binaries; its absence means "not built".
    pub output_dir: PathBuf,
    pub log_file: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: CommandSpec::new("msbuild", &["Ruby.sln", "/p:Configuration=Release", "/nologo"]),
            dir: PathBuf::from("."),
            output_dir: PathBuf::from("bin/Release"),
            log_file: "compile.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinsizeConfig {
    /// File-name globs that count as shipped binaries.
    pub include: Vec<String>,
    /// File-name globs for test harness and code generator artifacts.
    pub exclude: Vec<String>,
}

impl Default for BinsizeConfig {
    fn default() -> Self {
        Self {
            include: vec!["*.exe".into(), "*.dll".into(), "*.config".into()],
            exclude: vec!["*ClassInitGenerator*".into(), "*Tests*".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub archive_url: String,
    pub archive_file: String,
    pub max_redirects: u32,
    pub keep_archive: bool,
    pub timeout_secs: u64,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            archive_url: "https://github.com/ironruby/ironruby/zipball/master".to_string(),
            archive_file: "repo.zip".to_string(),
            max_redirects: 10,
            keep_archive: false,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Runs per execution mode. Every mode uses the same count.
    pub iterations: u32,
    /// Program whose process lifetime is the startup time.
    pub startup_program: PathBuf,
    /// Program that prints its own elapsed seconds on stdout.
    pub throughput_program: PathBuf,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            startup_program: PathBuf::from("bench/empty.rb"),
            throughput_program: PathBuf::from("bench/loop.rb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingSetConfig {
    /// Long-lived program that writes its pid to `pid_file` and idles.
    pub helper_program: PathBuf,
    /// Relative to `data_dir`.
    pub pid_file: String,
    pub warmup_secs: u64,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            helper_program: PathBuf::from("bench/getpid.rb"),
            pid_file: "pid".to_string(),
            warmup_secs: 5,
            timeout_secs: 20,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub runner: CommandSpec,
    /// Working directory of the runner.
    pub dir: PathBuf,
    pub candidate_flags: Vec<String>,
    pub reference_flags: Vec<String>,
    /// Passed to the runner as `-B<file>` when set.
    pub config_file: Option<PathBuf>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            runner: CommandSpec::new("mspec", &["run", "-fs"]),
            dir: PathBuf::from("."),
            candidate_flags: vec!["-Gcritical".into(), "-Gunstable".into(), "-Gruby".into()],
            reference_flags: vec!["-Gruby".into()],
            config_file: None,
        }
    }
}

impl SuiteConfig {
    pub fn flags(&self, runtime: Runtime) -> &[String] {
        match runtime {
            Runtime::Candidate => &self.candidate_flags,
            Runtime::Reference => &self.reference_flags,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub poll_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 45 * 60,
            max_retries: 2,
            poll_interval_secs: 5,
        }
    }
}

impl SupervisorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub port: u16,
    /// Added to the reference runtime's library expectation count when
    /// rendering: guarded specs the reference skips are not counted in its
    /// log, which otherwise inflates the candidate's pass rate.
    pub library_expectation_offset: i64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Runtime status".to_string(),
            port: 4567,
            library_expectation_offset: 2300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Relative to `data_dir`.
    pub pid_file: String,
    /// Remote location handed to the transfer command, e.g. `host:site/`.
    pub destination: Option<String>,
    /// Invoked as `<program> <args...> <artifact> <destination>`.
    pub transfer: Option<CommandSpec>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_attempts: 10,
            poll_interval_ms: 1000,
            pid_file: "server.pid".to_string(),
            destination: None,
            transfer: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            candidate: RuntimeConfig {
                binary: PathBuf::from("bin/Release/ir.exe"),
                args: Vec::new(),
                interpret_args: vec!["-X:CompilationThreshold".into(), "1000000000".into()],
                process_name: Some("ir.exe".into()),
            },
            reference: RuntimeConfig::default(),
            build: BuildConfig::default(),
            binsize: BinsizeConfig::default(),
            repo: RepoConfig::default(),
            bench: BenchConfig::default(),
            working_set: WorkingSetConfig::default(),
            suite: SuiteConfig::default(),
            supervisor: SupervisorConfig::default(),
            report: ReportConfig::default(),
            publish: PublishConfig::default(),
            source: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from `rtstats.yml` in the current directory.
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !config_path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", config_path.display());
            }
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config {}", config_path.display()))?;
        let mut config = Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config.source = Some(config_path);
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Config> {
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yml::from_str(contents)?)
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))
    }

    pub fn runtime(&self, runtime: Runtime) -> &RuntimeConfig {
        match runtime {
            Runtime::Candidate => &self.candidate,
            Runtime::Reference => &self.reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.bench.iterations, 10);
        assert_eq!(config.repo.max_redirects, 10);
        assert_eq!(config.supervisor.timeout(), Duration::from_secs(2700));
        assert_eq!(config.supervisor.max_retries, 2);
        assert_eq!(config.publish.poll_attempts, 10);
        assert_eq!(config.publish.poll_interval_ms, 1000);
        assert_eq!(config.report.library_expectation_offset, 2300);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "\
data_dir: /tmp/stats
bench:
  iterations: 3
report:
  library_expectation_offset: 0
";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/stats"));
        assert_eq!(config.bench.iterations, 3);
        assert_eq!(config.bench.startup_program, PathBuf::from("bench/empty.rb"));
        assert_eq!(config.report.library_expectation_offset, 0);
        assert_eq!(config.report.port, 4567);
        assert_eq!(config.supervisor.max_retries, 2);
    }

    #[test]
    fn command_specs_parse_from_yaml() {
        let yaml = "\
build:
  command:
    program: make
    args: [release]
publish:
  destination: example.org:site/
  transfer:
    program: scp
";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.build.command, CommandSpec::new("make", &["release"]));
        assert_eq!(config.build.command.display(), "make release");
        let transfer = config.publish.transfer.unwrap();
        assert_eq!(transfer.program, "scp");
        assert!(transfer.args.is_empty());
    }

    #[test]
    fn empty_file_is_default() {
        let config = Config::from_yaml("  \n").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(Config::from_yaml("bench: [unclosed").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/rtstats.yml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtstats.yml");
        std::fs::write(&path, "bench:\n  iterations: 2\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bench.iterations, 2);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn process_name_falls_back_to_binary_file_name() {
        let runtime = RuntimeConfig {
            binary: PathBuf::from("/opt/ruby/bin/ruby"),
            ..RuntimeConfig::default()
        };
        assert_eq!(runtime.process_name(), Some("ruby"));
        assert_eq!(Config::default().candidate.process_name(), Some("ir.exe"));
    }
}
