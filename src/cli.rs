use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::formatter::ReporterKind;
use crate::metric::MetricName;

/// Fixed flags. `--<metric>` and `--skip-<metric>` are added per metric by
/// [`Args::cli_command`] and collected into `metrics` and `skip`.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "rtstats",
    version,
    about = "Measure a candidate runtime against a reference runtime"
)]
pub struct Args {
    /// Run every metric, save a snapshot and publish the report
    #[arg(long)]
    pub all: bool,

    /// Remove logs and downloaded archives from the data directory
    #[arg(long)]
    pub clean: bool,

    /// Path to configuration file (default: rtstats.yml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// What to do with collected values
    #[arg(long, value_enum, default_value_t = ReporterKind::Data)]
    pub reporter: ReporterKind,

    /// Run `--all` in a child process, killing and retrying it if it hangs
    #[arg(long)]
    pub supervise: bool,

    /// Serve the report for the latest snapshot (used by publishing)
    #[arg(long)]
    pub serve: bool,

    /// Save the snapshot but do not publish it
    #[arg(long)]
    pub no_publish: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Metrics requested individually, in metric order.
    #[arg(skip)]
    pub metrics: Vec<MetricName>,

    #[arg(skip)]
    pub skip: Vec<MetricName>,
}

impl Args {
    pub fn cli_command() -> clap::Command {
        let mut cmd = <Self as CommandFactory>::command();
        for name in MetricName::ALL {
            cmd = cmd
                .arg(
                    Arg::new(name.as_str())
                        .long(name.flag())
                        .action(ArgAction::SetTrue)
                        .help(format!("Run only the {} metric", name.as_str()))
                        .help_heading("Metrics"),
                )
                .arg(
                    Arg::new(name.skip_flag())
                        .long(name.skip_flag())
                        .action(ArgAction::SetTrue)
                        .help(format!("Leave {} out of the run", name.as_str()))
                        .help_heading("Skipping"),
                );
        }
        cmd
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        let mut args = <Self as FromArgMatches>::from_arg_matches(matches)?;
        for name in MetricName::ALL {
            if matches.get_flag(name.as_str()) {
                args.metrics.push(name);
            }
            if matches.get_flag(name.skip_flag()) {
                args.skip.push(name);
            }
        }
        Ok(args)
    }

    pub fn try_parse_args<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::cli_command().try_get_matches_from(iter)?;
        Self::from_matches(&matches)
    }

    /// Parse the process arguments; usage errors print and exit with 2.
    pub fn parse_from_env() -> Self {
        Self::try_parse_args(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    /// True when the invocation names nothing to do.
    pub fn is_idle(&self) -> bool {
        !(self.all || self.clean || self.supervise || self.serve || !self.metrics.is_empty())
    }

    /// Flags a supervised child must see to run the same pipeline.
    pub fn forwarded(&self) -> Vec<OsString> {
        let mut out = Vec::new();
        if let Some(config) = &self.config {
            out.push("--config".into());
            out.push(config.into());
        }
        if self.reporter != ReporterKind::Data {
            out.push("--reporter=text".into());
        }
        if self.no_publish {
            out.push("--no-publish".into());
        }
        if self.debug {
            out.push("--debug".into());
        }
        for name in &self.skip {
            out.push(format!("--{}", name.skip_flag()).into());
        }
        out
    }
}
