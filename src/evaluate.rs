//! Top-level evaluation API.
//!
//! A run is linear: list the image sources, query the vision model once per
//! image, then judge every resulting test case. Fatal problems (missing
//! manifest, unresolvable image, unconfigured provider) surface as
//! `Err(EvalError)` before any vision query is sent.

use crate::config::{EvalSettings, SourceKind};
use crate::error::EvalError;
use crate::pipeline::cases::build_test_cases;
use crate::pipeline::judge::{evaluate, JudgeModel, ProviderJudge};
use crate::pipeline::sources::{list_pdf_sources, list_text_sources};
use crate::pipeline::vision::{check_hosted_model, VisionClient};
use crate::report::{MetricKind, RunOutput};
use std::path::Path;
use tracing::info;

/// Evaluate `model` on one attack-image collection with the production
/// backends and judge.
///
/// # Example
///
/// ```rust,no_run
/// use vision_attack_eval::{run, EvalSettings, MetricKind, SourceKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Without `api_key` the judge reads OPENAI_API_KEY; "llava" goes to the custom endpoint.
///     let settings = EvalSettings::default();
///     let output = run(
///         &SourceKind::Pdf,
///         "What do you see?",
///         "llava",
///         &[MetricKind::Hallucination],
///         &settings,
///     )
///     .await?;
///     let (passed, failed, errored) = output.report.totals();
///     println!("{passed} passed, {failed} failed, {errored} errored");
///     Ok(())
/// }
/// ```
pub async fn run(
    source: &SourceKind,
    prompt: &str,
    model: &str,
    metrics: &[MetricKind],
    settings: &EvalSettings,
) -> Result<RunOutput, EvalError> {
    let judge = ProviderJudge::from_settings(settings)?;
    if settings.is_hosted_model(model) {
        check_hosted_model(model, settings)?;
    }
    let client = VisionClient::from_settings(settings);
    run_with(source, prompt, model, metrics, &client, &judge, settings).await
}

/// [`run`] over caller-supplied vision backends and judge.
pub async fn run_with(
    source: &SourceKind,
    prompt: &str,
    model: &str,
    metrics: &[MetricKind],
    client: &VisionClient,
    judge: &dyn JudgeModel,
    settings: &EvalSettings,
) -> Result<RunOutput, EvalError> {
    let sources = match source {
        SourceKind::Pdf => list_pdf_sources(settings)?,
        SourceKind::Text { words_file } => {
            list_text_sources(&settings.resolve_word_list(words_file), settings)?
        }
    };
    info!("Evaluating {} on {} images from {}", model, sources.len(), source);

    let cases = build_test_cases(client, &sources, prompt, model, settings).await?;
    let report = evaluate(&cases, metrics, judge, settings).await;

    Ok(RunOutput {
        source: source.clone(),
        model: model.to_string(),
        prompt: prompt.to_string(),
        report,
    })
}

/// Evaluate the rendered PDF pages.
pub async fn evaluate_pdfs(
    prompt: &str,
    model: &str,
    settings: &EvalSettings,
) -> Result<RunOutput, EvalError> {
    run(&SourceKind::Pdf, prompt, model, &[MetricKind::Hallucination], settings).await
}

/// Evaluate the rendered words of one word list.
pub async fn evaluate_text_images(
    words_file: impl AsRef<Path>,
    prompt: &str,
    model: &str,
    settings: &EvalSettings,
) -> Result<RunOutput, EvalError> {
    let source = SourceKind::Text {
        words_file: words_file.as_ref().to_path_buf(),
    };
    run(&source, prompt, model, &[MetricKind::Hallucination], settings).await
}

/// Write a run's output as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_report(output: &RunOutput, path: impl AsRef<Path>) -> Result<(), EvalError> {
    let path = path.as_ref();
    let write_failed = |source: std::io::Error| EvalError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(output)
        .map_err(|e| EvalError::Internal(format!("report serialisation failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;

    info!("Report written to '{}'", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::EvaluationReport;

    fn output() -> RunOutput {
        RunOutput {
            source: SourceKind::Pdf,
            model: "llava".into(),
            prompt: "What do you see?".into(),
            report: EvaluationReport::new("gpt-4o", 0.5, vec![], 0),
        }
    }

    #[tokio::test]
    async fn write_report_is_atomic_and_parseable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");

        write_report(&output(), &path).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let back: RunOutput = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back.model, "llava");
        assert_eq!(back.source, SourceKind::Pdf);
    }

    #[tokio::test]
    async fn missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EvalSettings::builder().data_path(dir.path()).build().unwrap();
        let client = VisionClient::from_settings(&settings);

        struct NeverJudge;
        #[async_trait::async_trait]
        impl JudgeModel for NeverJudge {
            fn model_name(&self) -> &str {
                "never"
            }
            async fn complete(
                &self,
                _system: &str,
                _prompt: &str,
            ) -> Result<String, crate::error::ModelError> {
                unreachable!("judge must not be called")
            }
        }

        let err = run_with(
            &SourceKind::Pdf,
            "p",
            "llava",
            &[MetricKind::Hallucination],
            &client,
            &NeverJudge,
            &settings,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EvalError::ManifestNotFound { .. }));
    }
}
