//! Report page served by `--serve` and published as `index.html`.

use std::fmt::{self, Write};

use crate::config::ReportConfig;
use crate::formatter::{format_mb, format_rate, format_speedup, format_time};
use crate::metric::{MetricName, MetricValue, ModeTimings};
use crate::snapshot::Snapshot;
use crate::suite::{Scope, SuiteComparison, SuiteResult, grand_total_pass_rate};

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;margin-bottom:1.5em}\
td,th{border:1px solid #ccc;padding:.25em .75em;text-align:right}\
th:first-child,td:first-child{text-align:left}\
.good{color:green}.bad{color:red}";

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Suite comparisons of `snapshot` as rendered, i.e. with the library
/// offset applied to the reference side.
pub fn rendered_suites(snapshot: &Snapshot, report: &ReportConfig) -> Vec<(Scope, SuiteComparison)> {
    Scope::ALL
        .into_iter()
        .filter_map(|scope| {
            let cmp = *snapshot.get(MetricName::suite(scope))?.as_suite()?;
            let cmp = match scope {
                Scope::Library => cmp.with_reference_offset(report.library_expectation_offset),
                _ => cmp,
            };
            Some((scope, cmp))
        })
        .collect()
}

pub fn render_index(
    latest: &Snapshot,
    history: &[Snapshot],
    report: &ReportConfig,
) -> Result<String, fmt::Error> {
    let mut html = String::new();
    let title = escape(&report.title);
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html><head><meta charset=\"utf-8\"><title>{title}</title>")?;
    writeln!(html, "<style>{STYLE}</style></head><body>")?;
    writeln!(html, "<h1>{title}</h1>")?;
    writeln!(
        html,
        "<p>Generated from snapshot {} ({})</p>",
        latest.stamp(),
        latest.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
    )?;

    render_overview(&mut html, latest)?;
    render_binaries(&mut html, latest)?;
    for name in [MetricName::Startup, MetricName::Throughput] {
        if let Some(value) = latest.get(name) {
            render_timings(&mut html, name, value)?;
        }
    }

    let suites = rendered_suites(latest, report);
    for (scope, cmp) in &suites {
        render_suite(&mut html, MetricName::suite(*scope), cmp)?;
    }
    if !suites.is_empty() {
        writeln!(
            html,
            "<p><strong>Grand total pass rate: {}</strong></p>",
            format_rate(grand_total_pass_rate(suites.iter().map(|(_, c)| c)))
        )?;
    }

    render_history(&mut html, history, report)?;
    writeln!(html, "</body></html>")?;
    Ok(html)
}

fn value_cell(value: Option<&MetricValue>) -> String {
    match value {
        None | Some(MetricValue::NoData) => "No data".to_string(),
        Some(MetricValue::Failed { reason }) => {
            format!("<span class=\"bad\">failed: {}</span>", escape(reason))
        }
        Some(MetricValue::Seconds { value }) => format_time(Some(*value)),
        Some(v @ (MetricValue::Bytes { .. } | MetricValue::BinarySizes(_))) => {
            format_mb(v.as_bytes())
        }
        Some(_) => "see below".to_string(),
    }
}

fn render_overview(html: &mut String, snapshot: &Snapshot) -> fmt::Result {
    writeln!(html, "<table>")?;
    for name in [
        MetricName::Build,
        MetricName::Binsize,
        MetricName::Repo,
        MetricName::WorkingSet,
    ] {
        writeln!(
            html,
            "<tr><th>{}</th><td>{}</td></tr>",
            name.label(),
            value_cell(snapshot.get(name))
        )?;
    }
    writeln!(html, "</table>")
}

fn render_binaries(html: &mut String, snapshot: &Snapshot) -> fmt::Result {
    let Some(MetricValue::BinarySizes(sizes)) = snapshot.get(MetricName::Binsize) else {
        return Ok(());
    };
    writeln!(html, "<h2>Binaries</h2><table>")?;
    for (file, size) in &sizes.files {
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape(file),
            format_mb(Some(*size))
        )?;
    }
    writeln!(
        html,
        "<tr><th>Total</th><th>{}</th></tr></table>",
        format_mb(Some(sizes.total))
    )
}

fn signed_class(x: f64) -> &'static str {
    if x >= 0.0 { "good" } else { "bad" }
}

fn render_timings(html: &mut String, name: MetricName, value: &MetricValue) -> fmt::Result {
    writeln!(html, "<h2>{}</h2>", name.label())?;
    let Some(t) = value.as_timings() else {
        return writeln!(html, "<p>{}</p>", value_cell(Some(value)));
    };
    let ModeTimings {
        candidate_compiled,
        candidate_interpreted,
        reference,
        delta,
    } = *t;
    writeln!(html, "<table><tr><th>Mode</th><th>Time</th><th>vs reference</th></tr>")?;
    for (mode, seconds) in [
        ("Candidate (compiled)", candidate_compiled),
        ("Candidate (interpreted)", candidate_interpreted),
    ] {
        writeln!(
            html,
            "<tr><td>{mode}</td><td>{}</td><td>{}</td></tr>",
            format_time(Some(seconds)),
            format_speedup(seconds, reference)
        )?;
    }
    writeln!(
        html,
        "<tr><td>Reference</td><td>{}</td><td></td></tr>",
        format_time(Some(reference))
    )?;
    writeln!(
        html,
        "<tr><th>Delta</th><th class=\"{}\">{}</th><th></th></tr></table>",
        signed_class(delta),
        format_time(Some(delta))
    )
}

fn render_suite(html: &mut String, name: MetricName, cmp: &SuiteComparison) -> fmt::Result {
    writeln!(html, "<h2>{}</h2>", name.label())?;
    writeln!(
        html,
        "<table><tr><th></th><th>Candidate</th><th>Reference</th><th>Delta</th></tr>"
    )?;
    let time = |r: &Option<SuiteResult>| format_time(r.map(|r| r.seconds));
    writeln!(
        html,
        "<tr><td>time</td><td>{}</td><td>{}</td><td>{}</td></tr>",
        time(&cmp.candidate),
        time(&cmp.reference),
        time(&cmp.delta)
    )?;
    let fields: [(&str, fn(&SuiteResult) -> i64); 5] = [
        ("files", |r| r.files),
        ("examples", |r| r.examples),
        ("expectations", |r| r.expectations),
        ("failures", |r| r.failures),
        ("errors", |r| r.errors),
    ];
    for (field, get) in fields {
        let cell = |r: &Option<SuiteResult>| match r {
            Some(r) => get(r).to_string(),
            None => "No data".to_string(),
        };
        writeln!(
            html,
            "<tr><td>{field}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            cell(&cmp.candidate),
            cell(&cmp.reference),
            cell(&cmp.delta)
        )?;
    }
    writeln!(
        html,
        "<tr><th>pass rate</th><th colspan=\"3\">{}</th></tr></table>",
        format_rate(cmp.pass_rate())
    )
}

fn render_history(html: &mut String, history: &[Snapshot], report: &ReportConfig) -> fmt::Result {
    if history.is_empty() {
        return Ok(());
    }
    writeln!(html, "<h2>History</h2>")?;
    writeln!(
        html,
        "<table><tr><th>Snapshot</th><th>Build time</th><th>Grand total pass rate</th></tr>"
    )?;
    for snapshot in history {
        let suites = rendered_suites(snapshot, report);
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            snapshot.timestamp().format("%Y-%m-%d %H:%M"),
            value_cell(snapshot.get(MetricName::Build)),
            format_rate(grand_total_pass_rate(suites.iter().map(|(_, c)| c)))
        )?;
    }
    writeln!(html, "</table>")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use super::*;

    fn result(expectations: i64, failures: i64, errors: i64) -> SuiteResult {
        SuiteResult {
            seconds: 30.0,
            files: 10,
            examples: 20,
            expectations,
            failures,
            errors,
        }
    }

    fn snapshot(day: u32) -> Snapshot {
        Snapshot::new(
            Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap(),
            BTreeMap::from([
                (MetricName::Build, MetricValue::seconds(95.0)),
                (MetricName::WorkingSet, MetricValue::NoData),
                (MetricName::Repo, MetricValue::failed("status <500>")),
                (
                    MetricName::Startup,
                    MetricValue::Timings(ModeTimings::from_averages(0.5, 1.0, 0.25)),
                ),
                (
                    MetricName::SuiteLibrary,
                    MetricValue::Suite(SuiteComparison::new(
                        Some(result(2000, 0, 0)),
                        Some(result(1700, 0, 0)),
                    )),
                ),
            ]),
        )
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<a href='x'>&\"</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&quot;&lt;/a&gt;");
    }

    #[test]
    fn library_offset_applies_to_rendered_reference() {
        let report = ReportConfig::default();
        let suites = rendered_suites(&snapshot(1), &report);
        assert_eq!(suites.len(), 1);
        let (scope, cmp) = suites[0];
        assert_eq!(scope, Scope::Library);
        assert_eq!(cmp.reference.unwrap().expectations, 4000);
        assert_eq!(cmp.delta.unwrap().expectations, 2000);
        assert_eq!(cmp.pass_rate(), Some(0.5));
    }

    #[test]
    fn zero_offset_leaves_counts_alone() {
        let report = ReportConfig {
            library_expectation_offset: 0,
            ..ReportConfig::default()
        };
        let (_, cmp) = rendered_suites(&snapshot(1), &report)[0];
        assert_eq!(cmp.reference.unwrap().expectations, 1700);
    }

    #[test]
    fn page_shows_values_markers_and_history() {
        let latest = snapshot(2);
        let history = vec![snapshot(2), snapshot(1)];
        let html = render_index(&latest, &history, &ReportConfig::default()).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Runtime status</title>"));
        assert!(html.contains("<tr><th>Build time</th><td>1.58 m</td></tr>"));
        assert!(html.contains("<tr><th>Working set</th><td>No data</td></tr>"));
        assert!(html.contains("failed: status &lt;500&gt;"));
        assert!(html.contains("<tr><td>Candidate (compiled)</td><td>0.50 s</td><td>-2.00x</td></tr>"));
        assert!(html.contains("Grand total pass rate: 50.00%"));
        assert!(html.contains("<td>2024-04-02 12:00</td>"));
        assert!(html.contains("<td>2024-04-01 12:00</td>"));
        let newer = html.find("2024-04-02 12:00").unwrap();
        let older = html.find("2024-04-01 12:00").unwrap();
        assert!(newer < older);
        assert!(html.trim_end().ends_with("</body></html>"));
    }
}
