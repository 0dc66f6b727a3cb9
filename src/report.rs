//! Evaluation results: per-case metric outcomes and per-metric tallies.

use crate::config::SourceKind;
use crate::error::CaseError;
use crate::pipeline::cases::TestCase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which judge-based metric scored a case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Share of contexts the output contradicts. Lower is better.
    #[default]
    Hallucination,
    /// How fully the output matches the expected description. Higher is better.
    Correctness,
}

impl MetricKind {
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Hallucination => "hallucination",
            MetricKind::Correctness => "correctness",
        }
    }

    /// Whether `score` passes at `threshold`.
    pub fn passes(self, score: f64, threshold: f64) -> bool {
        match self {
            MetricKind::Hallucination => score <= threshold,
            MetricKind::Correctness => score >= threshold,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the judge concluded for one (case, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MetricOutcome {
    Scored {
        score: f64,
        passed: bool,
        reason: String,
    },
    Failed {
        error: CaseError,
    },
}

/// One metric applied to one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: MetricKind,
    #[serde(flatten)]
    pub outcome: MetricOutcome,
}

impl MetricResult {
    /// `Some(passed)` when scored, `None` when the judgment failed.
    pub fn passed(&self) -> Option<bool> {
        match &self.outcome {
            MetricOutcome::Scored { passed, .. } => Some(*passed),
            MetricOutcome::Failed { .. } => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match &self.outcome {
            MetricOutcome::Scored { score, .. } => Some(*score),
            MetricOutcome::Failed { .. } => None,
        }
    }
}

/// Every metric outcome for one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// Position of the case in the input order.
    pub index: usize,
    pub case: TestCase,
    pub metrics: Vec<MetricResult>,
}

/// Tally of one metric across all cases.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub passed: usize,
    pub failed: usize,
    /// Judgments that produced no score.
    pub errored: usize,
    /// Mean over scored judgments; `None` when nothing was scored.
    pub mean_score: Option<f64>,
}

impl MetricSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }
}

/// Results of judging a batch of test cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub judge_model: String,
    pub threshold: f64,
    /// In input order.
    pub cases: Vec<CaseResult>,
    pub summary: BTreeMap<MetricKind, MetricSummary>,
    pub duration_ms: u64,
}

impl EvaluationReport {
    /// Build a report, sorting cases by index and tallying every metric.
    pub fn new(
        judge_model: impl Into<String>,
        threshold: f64,
        mut cases: Vec<CaseResult>,
        duration_ms: u64,
    ) -> Self {
        cases.sort_by_key(|c| c.index);
        let summary = summarize(&cases);
        Self {
            judge_model: judge_model.into(),
            threshold,
            cases,
            summary,
            duration_ms,
        }
    }

    /// Passed, failed and errored judgments over every metric.
    pub fn totals(&self) -> (usize, usize, usize) {
        self.summary.values().fold((0, 0, 0), |(p, f, e), s| {
            (p + s.passed, f + s.failed, e + s.errored)
        })
    }

    /// True when every judgment was scored and passed.
    pub fn all_passed(&self) -> bool {
        let (_, failed, errored) = self.totals();
        failed == 0 && errored == 0
    }

    /// Cases whose vision query fell back to the sentinel.
    pub fn vision_failures(&self) -> usize {
        self.cases.iter().filter(|c| c.case.vision_failed()).count()
    }
}

/// Fold per-case results into per-metric tallies.
///
/// Counts are order-independent; scores are summed in index order.
fn summarize(cases: &[CaseResult]) -> BTreeMap<MetricKind, MetricSummary> {
    let mut sums: BTreeMap<MetricKind, (MetricSummary, f64)> = BTreeMap::new();

    for result in cases.iter().flat_map(|c| c.metrics.iter()) {
        let (summary, sum) = sums.entry(result.metric).or_default();
        match &result.outcome {
            MetricOutcome::Scored { score, passed, .. } => {
                if *passed {
                    summary.passed += 1;
                } else {
                    summary.failed += 1;
                }
                *sum += score;
            }
            MetricOutcome::Failed { .. } => summary.errored += 1,
        }
    }

    sums.into_iter()
        .map(|(metric, (mut summary, sum))| {
            let scored = summary.passed + summary.failed;
            summary.mean_score = (scored > 0).then(|| sum / scored as f64);
            (metric, summary)
        })
        .collect()
}

/// Everything one evaluation run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub source: SourceKind,
    /// Vision model under test.
    pub model: String,
    pub prompt: String,
    pub report: EvaluationReport,
}
