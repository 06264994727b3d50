pub mod cache;
pub mod cli;
pub mod collector;
pub mod config;
pub mod formatter;
pub mod handshake;
pub mod log_parser;
pub mod metric;
pub mod process;
pub mod publish;
pub mod registry;
pub mod server;
pub mod snapshot;
pub mod suite;
pub mod supervisor;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Args;
use config::Config;
use formatter::create_reporter;
use registry::{ReportRegistry, Target};
use supervisor::{PipelineRun, Supervisor};

/// Run one invocation. Returns the exit code: 0 = success, anything else
/// is the exit code of a supervised run that failed.
pub fn run(args: Args) -> Result<i32> {
    init_logging(args.debug);
    let config = Config::load(args.config.as_deref())?;

    if args.serve {
        server::serve(config)?;
        return Ok(0);
    }

    if args.is_idle() {
        Args::cli_command().print_help()?;
        return Ok(0);
    }

    if args.clean {
        let removed = cache::clean_transient(&config.data_dir)?;
        info!("removed {} files from {}", removed.len(), config.data_dir.display());
    }

    if args.supervise {
        return supervise(&args, &config);
    }

    let mut registry = ReportRegistry::default_registry(&config);
    for &name in &args.skip {
        registry.skip(name);
    }
    let publish = config.publish.enabled && !args.no_publish;
    let mut reporter = create_reporter(args.reporter, &config, publish);

    if args.all {
        registry.run(Target::All, reporter.as_mut())?;
    } else {
        for name in registry.discover() {
            if args.metrics.contains(&name) {
                registry.run(Target::Metric(name), reporter.as_mut())?;
            }
        }
    }
    Ok(0)
}

fn supervise(args: &Args, config: &Config) -> Result<i32> {
    let companion = config.candidate.process_name().map(str::to_string);
    let mut op = PipelineRun::new(args.forwarded(), companion)?;
    let supervisor = Supervisor::from_config(&config.supervisor);
    let status = supervisor.supervise(&mut op, || {
        cache::clean_transient(&config.data_dir).map(|_| ())
    })?;

    if status.success() {
        Ok(0)
    } else {
        warn!("supervised run exited with {status}");
        Ok(status.code().unwrap_or(3))
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default filter.
pub fn init_logging(debug: bool) {
    let default = if debug { "rtstats=debug" } else { "rtstats=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
