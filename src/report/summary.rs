//! Aggregation of a batch outcome into a summary.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::domain::{BatchOutcome, ErrorKind, JobResult, OutcomeSource, Target};

/// Mean score of one category across successful results
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CategoryAverage {
    Mean(f64),

    /// No successful result carried this category
    NoData,
}

impl CategoryAverage {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Mean(mean) => Some(*mean),
            Self::NoData => None,
        }
    }
}

impl Serialize for CategoryAverage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Mean(mean) => serializer.serialize_f64(*mean),
            Self::NoData => serializer.serialize_str("no data"),
        }
    }
}

/// A target whose job ended in failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTarget {
    pub target: Target,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,

    /// Results served from the cache
    pub cached_tests: usize,

    pub elapsed_ms: u64,
    pub average_scores: BTreeMap<String, CategoryAverage>,
    pub failures: Vec<FailedTarget>,
}

impl Summary {
    /// Mean for `category`, `None` when it was neither requested nor scored
    pub fn average(&self, category: &str) -> Option<CategoryAverage> {
        self.average_scores.get(category).copied()
    }
}

/// Summarize a batch.
///
/// Failures count toward the totals but never toward category means. A
/// category missing from a successful result is left out of that result's
/// contribution rather than counted as zero.
pub fn summarize(outcome: &BatchOutcome) -> Summary {
    let mut sums: BTreeMap<String, (f64, usize)> = outcome
        .categories
        .iter()
        .map(|category| (category.clone(), (0.0, 0)))
        .collect();
    let mut failures = Vec::new();
    let mut passed_tests = 0;

    for target_outcome in &outcome.outcomes {
        match &target_outcome.result {
            JobResult::Success { scores, .. } => {
                passed_tests += 1;
                for (category, score) in scores {
                    let entry = sums.entry(category.clone()).or_insert((0.0, 0));
                    entry.0 += score;
                    entry.1 += 1;
                }
            }
            JobResult::Failure {
                error_kind,
                message,
                ..
            } => failures.push(FailedTarget {
                target: target_outcome.target.clone(),
                kind: *error_kind,
                message: message.clone(),
            }),
        }
    }

    let average_scores = sums
        .into_iter()
        .map(|(category, (sum, count))| {
            let average = if count == 0 {
                CategoryAverage::NoData
            } else {
                CategoryAverage::Mean(sum / count as f64)
            };
            (category, average)
        })
        .collect();

    Summary {
        total_tests: outcome.len(),
        passed_tests,
        failed_tests: failures.len(),
        cached_tests: outcome
            .outcomes
            .iter()
            .filter(|o| o.source == OutcomeSource::Cache)
            .count(),
        elapsed_ms: outcome.elapsed_ms,
        average_scores,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobError, JobKey, JobOptions, TargetOutcome};
    use chrono::Utc;

    fn outcome(target: &str, result: JobResult, source: OutcomeSource) -> TargetOutcome {
        let target = Target::parse(target).unwrap();
        let key = JobKey::derive(&target, &JobOptions::default());
        TargetOutcome {
            target,
            key,
            result,
            attempts: 1,
            source,
            duration_ms: 10,
        }
    }

    fn scores(pairs: &[(&str, f64)]) -> JobResult {
        JobResult::success(
            pairs.iter().map(|(c, s)| (c.to_string(), *s)).collect(),
            Vec::new(),
        )
    }

    fn batch(categories: &[&str], outcomes: Vec<TargetOutcome>) -> BatchOutcome {
        BatchOutcome {
            outcomes,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            started_at: Utc::now(),
            elapsed_ms: 1234,
        }
    }

    #[test]
    fn test_failures_excluded_from_means() {
        let summary = summarize(&batch(
            &["performance"],
            vec![
                outcome("a.example", scores(&[("performance", 80.0)]), OutcomeSource::Fresh),
                outcome(
                    "b.example",
                    JobResult::failure(&JobError::PermanentTarget("dns".into())),
                    OutcomeSource::Fresh,
                ),
                outcome("c.example", scores(&[("performance", 100.0)]), OutcomeSource::Cache),
            ],
        ));

        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.passed_tests, 2);
        assert_eq!(summary.failed_tests, 1);
        assert_eq!(summary.cached_tests, 1);
        assert_eq!(summary.average("performance"), Some(CategoryAverage::Mean(90.0)));
        assert_eq!(summary.failures[0].kind, ErrorKind::PermanentTarget);
        assert_eq!(summary.elapsed_ms, 1234);
    }

    #[test]
    fn test_missing_category_not_counted_as_zero() {
        let summary = summarize(&batch(
            &["performance", "seo"],
            vec![
                outcome(
                    "a.example",
                    scores(&[("performance", 60.0), ("seo", 90.0)]),
                    OutcomeSource::Fresh,
                ),
                outcome("b.example", scores(&[("performance", 40.0)]), OutcomeSource::Fresh),
            ],
        ));

        assert_eq!(summary.average("performance"), Some(CategoryAverage::Mean(50.0)));
        assert_eq!(summary.average("seo"), Some(CategoryAverage::Mean(90.0)));
    }

    #[test]
    fn test_no_successes_yields_no_data() {
        let summary = summarize(&batch(
            &["accessibility"],
            vec![outcome(
                "a.example",
                JobResult::failure(&JobError::TransientAudit("flake".into())),
                OutcomeSource::Fresh,
            )],
        ));

        assert_eq!(summary.average("accessibility"), Some(CategoryAverage::NoData));
        assert_eq!(summary.passed_tests, 0);
    }

    #[test]
    fn test_empty_batch() {
        let summary = summarize(&batch(&["seo"], Vec::new()));
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.average("seo"), Some(CategoryAverage::NoData));
        assert!(summary.failures.is_empty());
    }

    #[test]
    fn test_no_data_serializes_as_placeholder() {
        let json = serde_json::to_value(CategoryAverage::NoData).unwrap();
        assert_eq!(json, serde_json::json!("no data"));
        assert_eq!(CategoryAverage::Mean(72.5).value(), Some(72.5));
    }
}
