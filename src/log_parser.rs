//! Parser for the summary a conformance runner prints at the end of a run:
//!
//! ```text
//! Finished in 12.5 seconds
//!
//! 3 files, 10 examples, 42 expectations, 2 failures, 0 errors
//! ```
//!
//! Retried runs can leave several summaries in one log. Each summary becomes
//! its own record; fields are never combined across summaries.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::suite::SuiteResult;

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Finished in (?P<seconds>[0-9]*\.?[0-9]+) seconds?\r?\n\r?\n(?P<files>[0-9]+) files?, (?P<examples>[0-9]+) examples?, (?P<expectations>[0-9]+) expectations?, (?P<failures>[0-9]+) failures?, (?P<errors>[0-9]+) errors?",
    )
    .expect("summary pattern is valid")
});

/// Every summary in `text`, in log order.
pub fn parse_all(text: &str) -> Vec<SuiteResult> {
    SUMMARY.captures_iter(text).filter_map(|c| record(&c)).collect()
}

/// The last summary in `text`, i.e. the final run of a possibly retried log.
/// `None` means "no data", not zero.
pub fn parse(text: &str) -> Option<SuiteResult> {
    SUMMARY.captures_iter(text).filter_map(|c| record(&c)).last()
}

// Counts are read as u32 and widened, which keeps every sum and difference
// of parsed counts well inside i64.
fn record(caps: &Captures<'_>) -> Option<SuiteResult> {
    let count = |name: &str| {
        caps.name(name)?
            .as_str()
            .parse::<u32>()
            .ok()
            .map(i64::from)
    };
    Some(SuiteResult {
        seconds: caps
            .name("seconds")?
            .as_str()
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite())?,
        files: count("files")?,
        examples: count("examples")?,
        expectations: count("expectations")?,
        failures: count("failures")?,
        errors: count("errors")?,
    })
}
