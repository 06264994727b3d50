//! Conformance-suite results and the candidate/reference comparison.
//!
//! Failures and errors are independent counters reported by the runner, so
//! nothing here assumes `expectations == passed + failures + errors`. Pass
//! rates are normalized against the reference runtime's expectation count
//! because the two runtimes do not necessarily run the same expectations.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Language,
    Core,
    Library,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Language, Scope::Core, Scope::Library];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Language => "language",
            Scope::Core => "core",
            Scope::Library => "library",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    Candidate,
    Reference,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Candidate => "candidate",
            Runtime::Reference => "reference",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary counts of one conformance run.
///
/// Counts are signed so that a delta between two runs is itself a
/// `SuiteResult`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub seconds: f64,
    pub files: i64,
    pub examples: i64,
    pub expectations: i64,
    pub failures: i64,
    pub errors: i64,
}

impl SuiteResult {
    /// Field-wise `reference - self`.
    pub fn delta_to(&self, reference: &SuiteResult) -> SuiteResult {
        SuiteResult {
            seconds: reference.seconds - self.seconds,
            files: reference.files.saturating_sub(self.files),
            examples: reference.examples.saturating_sub(self.examples),
            expectations: reference.expectations.saturating_sub(self.expectations),
            failures: reference.failures.saturating_sub(self.failures),
            errors: reference.errors.saturating_sub(self.errors),
        }
    }

    pub fn passed(&self) -> i64 {
        self.expectations
            .saturating_sub(self.failures)
            .saturating_sub(self.errors)
    }

    fn add(&mut self, other: &SuiteResult) {
        self.seconds += other.seconds;
        self.files = self.files.saturating_add(other.files);
        self.examples = self.examples.saturating_add(other.examples);
        self.expectations = self.expectations.saturating_add(other.expectations);
        self.failures = self.failures.saturating_add(other.failures);
        self.errors = self.errors.saturating_add(other.errors);
    }
}

/// Candidate and reference results for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteComparison {
    pub candidate: Option<SuiteResult>,
    pub reference: Option<SuiteResult>,
    /// `reference - candidate`; absent unless both sides are present.
    pub delta: Option<SuiteResult>,
}

impl SuiteComparison {
    pub fn new(candidate: Option<SuiteResult>, reference: Option<SuiteResult>) -> Self {
        let delta = match (&candidate, &reference) {
            (Some(c), Some(r)) => Some(c.delta_to(r)),
            _ => None,
        };
        Self {
            candidate,
            reference,
            delta,
        }
    }

    pub fn pass_rate(&self) -> Option<f64> {
        pass_rate(self.candidate.as_ref()?, self.reference.as_ref()?)
    }

    /// Add `offset` to the reference expectation count (and the delta).
    ///
    /// The library scope uses this to account for expectations the
    /// reference runtime skips through guarded conditional specs.
    pub fn with_reference_offset(mut self, offset: i64) -> Self {
        if let Some(reference) = self.reference.as_mut() {
            reference.expectations = reference.expectations.saturating_add(offset);
        }
        if let Some(delta) = self.delta.as_mut() {
            delta.expectations = delta.expectations.saturating_add(offset);
        }
        self
    }
}

/// `(candidate.expectations - candidate.failures - candidate.errors) /
/// reference.expectations`. `None` when the reference ran no expectations.
pub fn pass_rate(candidate: &SuiteResult, reference: &SuiteResult) -> Option<f64> {
    if reference.expectations == 0 {
        return None;
    }
    Some(candidate.passed() as f64 / reference.expectations as f64)
}

/// Pass rate over the summed counts of several scopes.
///
/// Scopes missing either side are left out of both sums.
pub fn grand_total_pass_rate<'a>(
    comparisons: impl IntoIterator<Item = &'a SuiteComparison>,
) -> Option<f64> {
    let mut candidate = SuiteResult::default();
    let mut reference = SuiteResult::default();
    let mut any = false;
    for comparison in comparisons {
        if let (Some(c), Some(r)) = (&comparison.candidate, &comparison.reference) {
            candidate.add(c);
            reference.add(r);
            any = true;
        }
    }
    if !any {
        return None;
    }
    pass_rate(&candidate, &reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(expectations: i64, failures: i64, errors: i64) -> SuiteResult {
        SuiteResult {
            expectations,
            failures,
            errors,
            ..SuiteResult::default()
        }
    }

    #[test]
    fn delta_is_reference_minus_candidate() {
        let cmp = SuiteComparison::new(Some(counts(100, 5, 1)), Some(counts(110, 3, 0)));
        let delta = cmp.delta.unwrap();
        assert_eq!(delta.expectations, 10);
        assert_eq!(delta.failures, -2);
        assert_eq!(delta.errors, -1);
    }

    #[test]
    fn delta_covers_every_field() {
        let candidate = SuiteResult {
            seconds: 10.0,
            files: 3,
            examples: 30,
            expectations: 100,
            failures: 4,
            errors: 2,
        };
        let reference = SuiteResult {
            seconds: 4.5,
            files: 4,
            examples: 28,
            expectations: 90,
            failures: 1,
            errors: 0,
        };
        let delta = candidate.delta_to(&reference);
        assert_eq!(delta.seconds, -5.5);
        assert_eq!(delta.files, 1);
        assert_eq!(delta.examples, -2);
        assert_eq!(delta.expectations, -10);
        assert_eq!(delta.failures, -3);
        assert_eq!(delta.errors, -2);
    }

    #[test]
    fn delta_absent_when_one_side_missing() {
        assert!(SuiteComparison::new(Some(counts(1, 0, 0)), None).delta.is_none());
        assert!(SuiteComparison::new(None, Some(counts(1, 0, 0))).delta.is_none());
        assert!(SuiteComparison::new(None, None).pass_rate().is_none());
    }

    #[test]
    fn pass_rate_normalizes_against_reference() {
        let rate = pass_rate(&counts(100, 5, 1), &counts(110, 3, 0)).unwrap();
        assert!((rate - 94.0 / 110.0).abs() < 1e-12);
        assert_eq!((rate * 10_000.0).round() / 10_000.0, 0.8545);
    }

    #[test]
    fn pass_rate_without_reference_expectations_is_none() {
        assert_eq!(pass_rate(&counts(10, 0, 0), &counts(0, 0, 0)), None);
    }

    #[test]
    fn reference_offset_shifts_reference_and_delta() {
        let cmp = SuiteComparison::new(Some(counts(100, 0, 0)), Some(counts(110, 0, 0)))
            .with_reference_offset(2300);
        assert_eq!(cmp.reference.unwrap().expectations, 2410);
        assert_eq!(cmp.delta.unwrap().expectations, 2310);
        assert_eq!(cmp.candidate.unwrap().expectations, 100);
    }

    #[test]
    fn grand_total_sums_scopes() {
        let a = SuiteComparison::new(Some(counts(100, 10, 0)), Some(counts(100, 0, 0)));
        let b = SuiteComparison::new(Some(counts(50, 0, 10)), Some(counts(100, 0, 0)));
        let missing = SuiteComparison::new(None, Some(counts(1000, 0, 0)));
        let rate = grand_total_pass_rate([&a, &b, &missing]).unwrap();
        assert!((rate - 130.0 / 200.0).abs() < 1e-12);
        assert_eq!(grand_total_pass_rate([&missing]), None);
    }

    #[test]
    fn extreme_counts_saturate_instead_of_overflowing() {
        let huge = counts(0, i64::MAX, i64::MAX);
        assert_eq!(huge.passed(), i64::MIN);

        let cmp = SuiteComparison::new(Some(huge), Some(counts(i64::MAX, 0, 0)))
            .with_reference_offset(2300);
        assert_eq!(cmp.reference.unwrap().expectations, i64::MAX);
        assert!(cmp.pass_rate().unwrap() < 0.0);
        assert!(grand_total_pass_rate([&cmp, &cmp]).is_some());
    }
}
