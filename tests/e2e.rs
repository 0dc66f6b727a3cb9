//! Integration tests for vision-attack-eval.
//!
//! The first group runs the whole pipeline against fake vision backends and a
//! rule-based judge over a temporary data directory, so it always runs.
//!
//! The `live_*` tests call real models. They are gated behind the
//! `E2E_ENABLED` environment variable so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 OPENAI_API_KEY=sk-... cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use edgequake_llm::ImageData;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vision_attack_eval::render::text::{load_font, render_word_list};
use vision_attack_eval::{
    run, run_with, write_report, EvalError, EvalProgressCallback, EvalSettings, JudgeModel,
    MetricKind, MetricOutcome, ModelError, RunOutput, SourceKind, VisionBackend, VisionClient,
    ERROR_SENTINEL,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

fn write_png(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(path, buf).unwrap();
}

/// `<root>/txt/<list>.txt` plus one PNG per non-empty line.
fn text_fixture(root: &Path, list: &str, lines: &[&str]) -> PathBuf {
    let words_file = root.join("txt").join(format!("{list}.txt"));
    std::fs::create_dir_all(words_file.parent().unwrap()).unwrap();
    std::fs::write(&words_file, lines.join("\n")).unwrap();
    for line in lines.iter().filter(|l| !l.is_empty()) {
        let id: String = line.replace(' ', "_").chars().take(30).collect();
        write_png(&root.join(format!("attack_images/txt/{list}/{id}.png")));
    }
    words_file
}

/// Manifest plus one rendered page per entry.
fn pdf_fixture(root: &Path, entries: &[(&str, &str)]) {
    let manifest: Vec<serde_json::Value> = entries
        .iter()
        .map(|(f, d)| serde_json::json!({"filename": f, "description": d}))
        .collect();
    std::fs::create_dir_all(root.join("pdf")).unwrap();
    std::fs::write(
        root.join("pdf/pdf_descriptions.json"),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();
    for (f, _) in entries {
        write_png(&root.join(format!("attack_images/pdf/{f}__page_1__rescale_0.25.png")));
    }
}

/// Sequential queries, so scripted answers line up with sources.
fn settings(root: &Path) -> EvalSettings {
    EvalSettings::builder()
        .data_path(root)
        .concurrency(1)
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

/// Replies with scripted answers in call order; `None` means no text.
struct FakeVision {
    answers: Mutex<Vec<Option<String>>>,
    calls: AtomicUsize,
}

impl FakeVision {
    fn new(answers: &[Option<&str>]) -> Arc<Self> {
        let mut answers: Vec<Option<String>> =
            answers.iter().map(|a| a.map(str::to_string)).collect();
        answers.reverse();
        Arc::new(Self {
            answers: Mutex::new(answers),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VisionBackend for FakeVision {
    async fn describe(
        &self,
        _model: &str,
        _prompt: &str,
        _image: &ImageData,
    ) -> Result<Option<String>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answers.lock().unwrap().pop().flatten())
    }
}

/// Agrees when the last quoted word before the actual output appears in it.
struct KeywordJudge;

#[async_trait]
impl JudgeModel for KeywordJudge {
    fn model_name(&self) -> &str {
        "keyword-judge"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ModelError> {
        let (head, output) = prompt
            .rsplit_once("Actual output:\n")
            .ok_or_else(|| ModelError::InvalidResponse("prompt layout changed".into()))?;
        let keyword = head.rsplit('\'').nth(1).unwrap_or_default();
        let agrees = !keyword.is_empty() && output.contains(keyword);
        if head.contains("\"verdicts\"") {
            let verdict = if agrees { "yes" } else { "no" };
            Ok(format!(
                r#"{{"verdicts":[{{"verdict":"{verdict}","reason":"keyword '{keyword}'"}}]}}"#
            ))
        } else {
            let score = if agrees { 1.0 } else { 0.0 };
            Ok(format!(r#"{{"score":{score},"reason":"keyword '{keyword}'"}}"#))
        }
    }
}

// ── Mocked pipeline ──────────────────────────────────────────────────────────

#[tokio::test]
async fn text_pipeline_scores_each_word_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let words_file = text_fixture(dir.path(), "animals", &["cat", "", "dog", "bird"]);
    let s = settings(dir.path());
    let custom = FakeVision::new(&[
        Some("The word cat in black"),
        Some("I see the word cow"),
        None,
    ]);
    let client = VisionClient::with_backends(FakeVision::new(&[]), custom.clone(), &s);

    let output = run_with(
        &SourceKind::Text { words_file },
        "What do you see?",
        "llava",
        &[MetricKind::Hallucination],
        &client,
        &KeywordJudge,
        &s,
    )
    .await
    .unwrap();

    let report = &output.report;
    let ids: Vec<&str> = report.cases.iter().map(|c| c.case.identifier.as_str()).collect();
    assert_eq!(ids, ["cat", "dog", "bird"]);
    assert_eq!(custom.calls.load(Ordering::SeqCst), 3);

    let passed: Vec<Option<bool>> = report.cases.iter().map(|c| c.metrics[0].passed()).collect();
    assert_eq!(passed, [Some(true), Some(false), Some(false)]);

    let bird = &report.cases[2].case;
    assert_eq!(bird.actual_output, ERROR_SENTINEL);
    assert!(bird.vision_error.is_some());
    assert_eq!(
        bird.expected_output,
        "The image contains word 'bird' written in black text on white background."
    );
    assert_eq!(bird.context, vec![bird.expected_output.clone()]);

    let summary = report.summary[&MetricKind::Hallucination];
    assert_eq!(summary.passed + summary.failed + summary.errored, 3);
    assert_eq!((summary.passed, summary.failed), (1, 2));
}

#[tokio::test]
async fn pdf_pipeline_routes_hosted_models_and_keeps_manifest_order() {
    let dir = tempfile::tempdir().unwrap();
    pdf_fixture(
        dir.path(),
        &[
            ("invoice", "An invoice for 'widgets'."),
            ("memo", "A memo about 'budgets'."),
        ],
    );
    let s = settings(dir.path());
    let hosted = FakeVision::new(&[Some("widgets listed"), Some("budgets discussed")]);
    let custom = FakeVision::new(&[]);
    let client = VisionClient::with_backends(hosted.clone(), custom.clone(), &s);

    let output = run_with(
        &SourceKind::Pdf,
        "Describe the document",
        "gpt-4o-mini",
        &[MetricKind::Hallucination, MetricKind::Correctness],
        &client,
        &KeywordJudge,
        &s,
    )
    .await
    .unwrap();

    assert_eq!(hosted.calls.load(Ordering::SeqCst), 2);
    assert_eq!(custom.calls.load(Ordering::SeqCst), 0);

    let report = &output.report;
    assert_eq!(report.cases[0].case.identifier, "invoice");
    assert_eq!(report.cases[1].case.identifier, "memo");
    assert!(report.all_passed());
    assert_eq!(report.summary.len(), 2);
    assert_eq!(output.model, "gpt-4o-mini");
    assert_eq!(output.prompt, "Describe the document");
}

#[tokio::test]
async fn ambiguous_pdf_image_aborts_before_queries() {
    let dir = tempfile::tempdir().unwrap();
    pdf_fixture(dir.path(), &[("report", "A 'report'.")]);
    write_png(&dir.path().join("attack_images/pdf/report__page_1__rescale_0.5.png"));
    let s = settings(dir.path());
    let custom = FakeVision::new(&[]);
    let client = VisionClient::with_backends(FakeVision::new(&[]), custom.clone(), &s);

    let err = run_with(
        &SourceKind::Pdf,
        "p",
        "llava",
        &[MetricKind::Hallucination],
        &client,
        &KeywordJudge,
        &s,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EvalError::AmbiguousImage { ref candidates, .. } if candidates.len() == 2));
    assert_eq!(custom.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_word_list_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let client = VisionClient::with_backends(FakeVision::new(&[]), FakeVision::new(&[]), &s);

    let err = run_with(
        &SourceKind::Text {
            words_file: PathBuf::from("nope.txt"),
        },
        "p",
        "llava",
        &[MetricKind::Hallucination],
        &client,
        &KeywordJudge,
        &s,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EvalError::WordListNotFound { .. }));
}

#[derive(Default)]
struct CountingCallback {
    queries: AtomicUsize,
    judgments: AtomicUsize,
    completed: AtomicUsize,
}

impl EvalProgressCallback for CountingCallback {
    fn on_query_complete(&self, _index: usize, _total: usize, _identifier: &str, _failed: bool) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_judgment_complete(&self, _index: usize, _total: usize, _metric: &str, _passed: Option<bool>) {
        self.judgments.fetch_add(1, Ordering::SeqCst);
    }

    fn on_evaluation_complete(&self, _passed: usize, _failed: usize, _errored: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_query_and_judgment() {
    let dir = tempfile::tempdir().unwrap();
    let words_file = text_fixture(dir.path(), "colors", &["red", "green"]);
    let cb = Arc::new(CountingCallback::default());
    let s = EvalSettings::builder()
        .data_path(dir.path())
        .concurrency(1)
        .progress_callback(cb.clone())
        .build()
        .unwrap();
    let client = VisionClient::with_backends(
        FakeVision::new(&[]),
        FakeVision::new(&[Some("red"), Some("green")]),
        &s,
    );

    run_with(
        &SourceKind::Text { words_file },
        "p",
        "llava",
        &[MetricKind::Hallucination, MetricKind::Correctness],
        &client,
        &KeywordJudge,
        &s,
    )
    .await
    .unwrap();

    assert_eq!(cb.queries.load(Ordering::SeqCst), 2);
    assert_eq!(cb.judgments.load(Ordering::SeqCst), 4);
    assert_eq!(cb.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn report_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let words_file = text_fixture(dir.path(), "one", &["sun"]);
    let s = settings(dir.path());
    let client = VisionClient::with_backends(FakeVision::new(&[]), FakeVision::new(&[None]), &s);

    let output = run_with(
        &SourceKind::Text { words_file },
        "p",
        "llava",
        &[MetricKind::Hallucination],
        &client,
        &KeywordJudge,
        &s,
    )
    .await
    .unwrap();

    let path = dir.path().join("out/report.json");
    write_report(&output, &path).await.unwrap();
    let back: RunOutput = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

    assert_eq!(back.report, output.report);
    assert!(matches!(
        back.report.cases[0].metrics[0].outcome,
        MetricOutcome::Scored { passed: false, .. }
    ));
}

#[tokio::test]
async fn repeated_runs_share_ground_truth() {
    let dir = tempfile::tempdir().unwrap();
    let words_file = text_fixture(dir.path(), "pets", &["cat", "dog"]);
    let s = settings(dir.path());
    let source = SourceKind::Text { words_file };

    let mut outputs = Vec::new();
    for answers in [[Some("a cat"), Some("a dog")], [Some("a bat"), None]] {
        let client =
            VisionClient::with_backends(FakeVision::new(&[]), FakeVision::new(&answers), &s);
        let output = run_with(
            &source,
            "p",
            "llava",
            &[MetricKind::Hallucination],
            &client,
            &KeywordJudge,
            &s,
        )
        .await
        .unwrap();
        outputs.push(output);
    }

    let (first, second) = (&outputs[0].report.cases, &outputs[1].report.cases);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second) {
        assert_eq!(a.case.identifier, b.case.identifier);
        assert_eq!(a.case.expected_output, b.case.expected_output);
        assert_eq!(a.case.context, b.case.context);
        assert_ne!(a.case.actual_output, b.case.actual_output);
    }
}

// ── Live models ──────────────────────────────────────────────────────────────

/// Check whether the custom endpoint answers `/models`.
async fn custom_endpoint_is_available(endpoint: &str) -> bool {
    let url = format!("{}/models", endpoint.trim_end_matches('/'));
    matches!(
        reqwest::Client::new()
            .get(url)
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await,
        Ok(resp) if resp.status().is_success()
    )
}

/// Render a word, show it to a hosted model, and judge the answer.
///
/// Requires `E2E_ENABLED=1`, `OPENAI_API_KEY` and a system TrueType font.
#[tokio::test]
async fn live_hosted_model_reads_rendered_word() {
    e2e_skip_unless_enabled!();
    if std::env::var("OPENAI_API_KEY").is_err() {
        println!("SKIP — OPENAI_API_KEY not set");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let s = EvalSettings::builder().data_path(dir.path()).build().unwrap();
    let Ok(font) = load_font(&s.font_path) else {
        println!("SKIP — font not found: {}", s.font_path.display());
        return;
    };
    let words_file = dir.path().join("txt/live.txt");
    std::fs::create_dir_all(words_file.parent().unwrap()).unwrap();
    std::fs::write(&words_file, "elephant\n").unwrap();
    render_word_list(&words_file, &font, &s).unwrap();

    let output = run(
        &SourceKind::Text { words_file },
        "What word is written in this image?",
        "gpt-4o-mini",
        &[MetricKind::Hallucination],
        &s,
    )
    .await
    .expect("live evaluation should succeed");

    let case = &output.report.cases[0];
    println!("answer: {}", case.case.actual_output);
    assert!(case.case.vision_error.is_none());
    assert_eq!(case.metrics[0].passed(), Some(true));
}

/// Same flow against the OpenAI-compatible custom endpoint (e.g. Ollama).
///
/// Requires `E2E_ENABLED=1`, a reachable endpoint and `OPENAI_API_KEY` for the judge.
#[tokio::test]
async fn live_custom_endpoint_answers() {
    e2e_skip_unless_enabled!();
    let s = EvalSettings::default();
    if !custom_endpoint_is_available(&s.custom_endpoint).await {
        println!("SKIP — custom endpoint not reachable at {}", s.custom_endpoint);
        return;
    }
    let model = std::env::var("E2E_CUSTOM_MODEL").unwrap_or_else(|_| "llava".into());

    let client = VisionClient::from_settings(&s);
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([200, 30, 30])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();

    let answer = client.query(&buf, "What colour is this image?", &model).await;
    println!("{model}: {answer:?}");
    assert!(answer.failure().is_none(), "query failed: {answer:?}");
}
