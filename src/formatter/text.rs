use std::io::Write;

use anyhow::Result;

use crate::formatter::{Reporter, format_mb, format_rate, format_time};
use crate::metric::{MetricName, MetricValue, ModeTimings};
use crate::snapshot::Snapshot;
use crate::suite::{SuiteComparison, SuiteResult, grand_total_pass_rate};

/// Console reporter: one human-readable block per metric.
pub struct TextReporter<W: Write> {
    out: W,
}

impl<W: Write> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn metric(&mut self, name: MetricName, value: &MetricValue) -> Result<()> {
        let text = render(name, value);
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self, snapshot: &Snapshot) -> Result<()> {
        let suites: Vec<&SuiteComparison> = snapshot
            .metrics()
            .values()
            .filter_map(MetricValue::as_suite)
            .collect();
        if !suites.is_empty() {
            writeln!(
                self.out,
                "Grand total pass rate: {}",
                format_rate(grand_total_pass_rate(suites))
            )?;
        }
        Ok(())
    }
}

/// Text block for one metric, newline-terminated.
pub fn render(name: MetricName, value: &MetricValue) -> String {
    let label = name.label();
    match value {
        MetricValue::NoData => format!("{label}: No data\n"),
        MetricValue::Failed { reason } => format!("{label}: failed ({reason})\n"),
        MetricValue::Seconds { value } => format!("{label}: {value:.2} seconds\n"),
        MetricValue::Bytes { .. } | MetricValue::BinarySizes(_) => {
            format!("{label}: {}\n", format_mb(value.as_bytes()))
        }
        MetricValue::Timings(t) => render_timings(label, t),
        MetricValue::Suite(s) => render_suite(label, s),
    }
}

fn render_timings(label: &str, t: &ModeTimings) -> String {
    format!(
        "{label}: compiled({}), interpreted({}), reference({}), delta({})\n",
        format_time(Some(t.candidate_compiled)),
        format_time(Some(t.candidate_interpreted)),
        format_time(Some(t.reference)),
        format_time(Some(t.delta)),
    )
}

fn render_suite(label: &str, s: &SuiteComparison) -> String {
    let mut text = format!("{label}:\n");
    for (side, result) in [
        ("candidate", &s.candidate),
        ("reference", &s.reference),
        ("delta", &s.delta),
    ] {
        text.push_str(&format!("{side}:\n"));
        match result {
            Some(r) => push_fields(&mut text, r),
            None => text.push_str("\tNo data\n"),
        }
    }
    text.push_str(&format!("pass rate: {}\n", format_rate(s.pass_rate())));
    text
}

fn push_fields(text: &mut String, r: &SuiteResult) {
    text.push_str(&format!("\tseconds:\t{:.2}\n", r.seconds));
    for (field, count) in [
        ("files", r.files),
        ("examples", r.examples),
        ("expectations", r.expectations),
        ("failures", r.failures),
        ("errors", r.errors),
    ] {
        text.push_str(&format!("\t{field}:\t{count}\n"));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::metric::BinarySizes;

    fn result(expectations: i64, failures: i64, errors: i64) -> SuiteResult {
        SuiteResult {
            seconds: 1.0,
            files: 1,
            examples: 2,
            expectations,
            failures,
            errors,
        }
    }

    #[test]
    fn scalar_lines() {
        assert_eq!(
            render(MetricName::Build, &MetricValue::seconds(312.456)),
            "Build time: 312.46 seconds\n"
        );
        assert_eq!(
            render(MetricName::WorkingSet, &MetricValue::bytes(20 * 1024 * 1024)),
            "Working set: 20.00 MB\n"
        );
        assert_eq!(
            render(MetricName::WorkingSet, &MetricValue::NoData),
            "Working set: No data\n"
        );
        assert_eq!(
            render(MetricName::Repo, &MetricValue::failed("redirect too deep (limit 10)")),
            "Repository size: failed (redirect too deep (limit 10))\n"
        );
    }

    #[test]
    fn binary_size_uses_total() {
        let mut sizes = BinarySizes::default();
        sizes.insert("a.dll".into(), 1024 * 1024);
        sizes.insert("b.exe".into(), 1024 * 1024);
        assert_eq!(
            render(MetricName::Binsize, &MetricValue::BinarySizes(sizes)),
            "Binary size: 2.00 MB\n"
        );
    }

    #[test]
    fn timings_line_lists_every_mode() {
        let value = MetricValue::Timings(ModeTimings::from_averages(0.5, 0.25, 0.75));
        assert_eq!(
            render(MetricName::Startup, &value),
            "Startup time: compiled(0.50 s), interpreted(0.25 s), reference(0.75 s), delta(0.50 s)\n"
        );
    }

    #[test]
    fn suite_block_lists_sides_and_rate() {
        let cmp = SuiteComparison::new(Some(result(100, 5, 1)), None);
        let text = render(MetricName::SuiteCore, &MetricValue::Suite(cmp));
        assert!(text.starts_with("Conformance (core):\ncandidate:\n"));
        assert!(text.contains("\texpectations:\t100\n"));
        assert!(text.contains("reference:\n\tNo data\n"));
        assert!(text.ends_with("pass rate: No data\n"));
    }

    #[test]
    fn reporter_writes_lines_and_grand_total() {
        let mut reporter = TextReporter::new(Vec::new());
        let value = MetricValue::seconds(1.0);
        reporter.metric(MetricName::Build, &value).unwrap();

        let suite = MetricValue::Suite(SuiteComparison::new(
            Some(result(100, 5, 1)),
            Some(result(110, 3, 0)),
        ));
        let snapshot = Snapshot::new(
            Utc::now(),
            BTreeMap::from([(MetricName::Build, value), (MetricName::SuiteCore, suite)]),
        );
        reporter.finish(&snapshot).unwrap();

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(out, "Build time: 1.00 seconds\nGrand total pass rate: 85.45%\n");
    }
}
