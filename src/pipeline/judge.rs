//! Judgment: score each test case with LLM-judged metrics.
//!
//! ## Metrics
//!
//! * **Hallucination** asks the judge for one yes/no agreement verdict per
//!   context entry. The score is the share of contradicted contexts, in
//!   `[0, 1]`; a case passes when `score <= threshold`.
//! * **Correctness** asks for an overall 0–1 agreement score between the
//!   actual and expected outputs; a case passes when `score >= threshold`.
//!
//! ## Failure isolation
//!
//! Judgments run concurrently (`judge_concurrency`) and each one is retried
//! with exponential backoff under a per-call timeout. A judgment that still
//! fails is recorded as a [`CaseError`] on its own (case, metric) pair; the
//! rest of the batch is unaffected.

use crate::config::EvalSettings;
use crate::error::{CaseError, EvalError, ModelError};
use crate::pipeline::cases::TestCase;
use crate::pipeline::vision::hosted_provider;
use crate::prompts::{correctness_prompt, hallucination_prompt, JUDGE_SYSTEM_PROMPT};
use crate::report::{CaseResult, EvaluationReport, MetricKind, MetricOutcome, MetricResult};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Provider used for the judge model.
pub const JUDGE_PROVIDER: &str = "openai";

/// A language model that answers judge prompts.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    /// Model name recorded in the report.
    fn model_name(&self) -> &str;

    /// One system + user exchange; returns the raw reply text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ModelError>;
}

/// Judge backed by an `edgequake-llm` provider.
pub struct ProviderJudge {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderJudge {
    /// Build the judge named in `settings`.
    ///
    /// Uses `settings.api_key` when set. Fails when the provider cannot be
    /// constructed (usually a missing key).
    pub fn from_settings(settings: &EvalSettings) -> Result<Self, EvalError> {
        let provider = hosted_provider(settings.api_key.as_deref(), &settings.judge_model)
            .map_err(|e| EvalError::ProviderNotConfigured {
                provider: JUDGE_PROVIDER.to_string(),
                hint: format!(
                    "{e}\nSet OPENAI_API_KEY or pass --api-key to use judge model '{}'.",
                    settings.judge_model
                ),
            })?;
        Ok(Self::new(
            provider,
            settings.judge_model.clone(),
            settings.judge_temperature,
            settings.max_tokens,
        ))
    }

    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl JudgeModel for ProviderJudge {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ModelError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::Llm(format!("{e}")))?;
        debug!(
            "judge {}: {} input tokens, {} output tokens",
            self.model, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

// ── Verdict parsing ──────────────────────────────────────────────────────

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex is valid")
});

/// Pull the JSON object out of a judge reply.
///
/// Accepts a bare object, an object inside a fenced block, or an object
/// surrounded by prose.
fn extract_json(reply: &str) -> &str {
    let text = FENCED_JSON
        .captures(reply)
        .and_then(|c| c.get(1))
        .map_or(reply, |m| m.as_str())
        .trim();
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[derive(Debug, Deserialize)]
struct Verdicts {
    verdicts: Vec<Verdict>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    verdict: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScoreReply {
    score: f64,
    #[serde(default)]
    reason: Option<String>,
}

/// Hallucination score from a verdict reply: contradicted / total.
fn parse_hallucination(reply: &str, contexts: usize) -> Result<(f64, String), CaseError> {
    let parsed: Verdicts =
        serde_json::from_str(extract_json(reply)).map_err(|e| CaseError::InvalidVerdict {
            detail: e.to_string(),
        })?;

    if parsed.verdicts.len() != contexts {
        return Err(CaseError::InvalidVerdict {
            detail: format!(
                "expected {} verdicts, got {}",
                contexts,
                parsed.verdicts.len()
            ),
        });
    }

    let mut contradicted = 0usize;
    let mut reasons = Vec::new();
    for v in &parsed.verdicts {
        match v.verdict.trim().to_ascii_lowercase().as_str() {
            "yes" => {}
            "no" => {
                contradicted += 1;
                if let Some(ref r) = v.reason {
                    reasons.push(r.trim().to_string());
                }
            }
            other => {
                return Err(CaseError::InvalidVerdict {
                    detail: format!("verdict must be 'yes' or 'no', got '{other}'"),
                })
            }
        }
    }

    let score = contradicted as f64 / contexts as f64;
    let reason = if reasons.is_empty() {
        format!("The output agrees with all {contexts} context(s).")
    } else {
        format!(
            "The output contradicts {contradicted} of {contexts} context(s): {}",
            reasons.join(" ")
        )
    };
    Ok((score, reason))
}

/// Correctness score from a score reply, clamped to `[0, 1]`.
fn parse_correctness(reply: &str) -> Result<(f64, String), CaseError> {
    let parsed: ScoreReply =
        serde_json::from_str(extract_json(reply)).map_err(|e| CaseError::InvalidVerdict {
            detail: e.to_string(),
        })?;
    if !parsed.score.is_finite() {
        return Err(CaseError::InvalidVerdict {
            detail: format!("score is not a number: {}", parsed.score),
        });
    }
    Ok((
        parsed.score.clamp(0.0, 1.0),
        parsed.reason.unwrap_or_default().trim().to_string(),
    ))
}

// ── Engine ───────────────────────────────────────────────────────────────

/// Ask the judge once and parse its reply for `metric`.
async fn judge_once(
    judge: &dyn JudgeModel,
    metric: MetricKind,
    case: &TestCase,
) -> Result<(f64, String), CaseError> {
    let prompt = match metric {
        MetricKind::Hallucination => hallucination_prompt(&case.actual_output, &case.context),
        MetricKind::Correctness => correctness_prompt(&case.actual_output, &case.expected_output),
    };
    let reply = judge
        .complete(JUDGE_SYSTEM_PROMPT, &prompt)
        .await
        .map_err(|e| CaseError::JudgeFailed {
            retries: 0,
            detail: e.to_string(),
        })?;
    match metric {
        MetricKind::Hallucination => parse_hallucination(&reply, case.context.len()),
        MetricKind::Correctness => parse_correctness(&reply),
    }
}

/// One (case, metric) judgment with retries and a per-call timeout.
async fn judge_with_retry(
    judge: &dyn JudgeModel,
    metric: MetricKind,
    case: &TestCase,
    settings: &EvalSettings,
) -> MetricOutcome {
    if metric == MetricKind::Hallucination && case.context.is_empty() {
        return MetricOutcome::Failed {
            error: CaseError::InvalidVerdict {
                detail: "test case has no context to judge against".into(),
            },
        };
    }

    let mut last_err = CaseError::JudgeFailed {
        retries: 0,
        detail: "no attempt made".into(),
    };

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = settings.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{} / {}: judge retry {}/{} after {}ms",
                case.identifier, metric, attempt, settings.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let call = judge_once(judge, metric, case);
        match timeout(Duration::from_secs(settings.api_timeout_secs), call).await {
            Ok(Ok((score, reason))) => {
                return MetricOutcome::Scored {
                    score,
                    passed: metric.passes(score, settings.threshold),
                    reason,
                }
            }
            Ok(Err(e)) => {
                warn!(
                    "{} / {}: judgment attempt {} failed: {}",
                    case.identifier,
                    metric,
                    attempt + 1,
                    e
                );
                last_err = e;
            }
            Err(_) => {
                warn!(
                    "{} / {}: judgment attempt {} timed out",
                    case.identifier,
                    metric,
                    attempt + 1
                );
                last_err = CaseError::Timeout {
                    secs: settings.api_timeout_secs,
                };
            }
        }
    }

    let error = match last_err {
        CaseError::JudgeFailed { detail, .. } => CaseError::JudgeFailed {
            retries: settings.max_retries,
            detail,
        },
        other => other,
    };
    MetricOutcome::Failed { error }
}

/// Judge every case with every metric and assemble the report.
///
/// Metrics are applied once each, in [`MetricKind`] order, whatever the
/// order or duplication of `metrics`; an empty slice means hallucination
/// only. Cases keep their input order.
pub async fn evaluate(
    cases: &[TestCase],
    metrics: &[MetricKind],
    judge: &dyn JudgeModel,
    settings: &EvalSettings,
) -> EvaluationReport {
    let start = Instant::now();

    let mut kinds = if metrics.is_empty() {
        vec![MetricKind::default()]
    } else {
        metrics.to_vec()
    };
    kinds.sort();
    kinds.dedup();

    let jobs: Vec<(usize, MetricKind)> = (0..cases.len())
        .flat_map(|i| kinds.iter().map(move |&k| (i, k)))
        .collect();
    let total = jobs.len();

    if let Some(ref cb) = settings.progress_callback {
        cb.on_judgments_start(total);
    }
    info!(
        "Judging {} cases with {} metric(s) using {} (concurrency {})",
        cases.len(),
        kinds.len(),
        judge.model_name(),
        settings.judge_concurrency
    );

    let outcomes: Vec<(usize, MetricKind, MetricOutcome)> =
        stream::iter(jobs.into_iter().enumerate().map(|(job, (index, metric))| async move {
            let outcome = judge_with_retry(judge, metric, &cases[index], settings).await;
            if let Some(ref cb) = settings.progress_callback {
                let passed = match &outcome {
                    MetricOutcome::Scored { passed, .. } => Some(*passed),
                    MetricOutcome::Failed { .. } => None,
                };
                cb.on_judgment_complete(job, total, metric.name(), passed);
            }
            (index, metric, outcome)
        }))
        .buffer_unordered(settings.judge_concurrency.max(1))
        .collect()
        .await;

    let mut results: Vec<CaseResult> = cases
        .iter()
        .enumerate()
        .map(|(index, case)| CaseResult {
            index,
            case: case.clone(),
            metrics: Vec::with_capacity(kinds.len()),
        })
        .collect();
    for (index, metric, outcome) in outcomes {
        results[index].metrics.push(MetricResult { metric, outcome });
    }
    for result in &mut results {
        result.metrics.sort_by_key(|m| m.metric);
    }

    let report = EvaluationReport::new(
        judge.model_name(),
        settings.threshold,
        results,
        start.elapsed().as_millis() as u64,
    );

    let (passed, failed, errored) = report.totals();
    info!(
        "Judged {} cases: {} passed, {} failed, {} errored",
        cases.len(),
        passed,
        failed,
        errored
    );
    if let Some(ref cb) = settings.progress_callback {
        cb.on_evaluation_complete(passed, failed, errored);
    }
    report
}
