//! # vision-attack-eval
//!
//! Measure how vision language models handle adversarial "attack images":
//! degraded PDF pages and words rendered as pictures. Each image is shown to
//! the model under test, and an LLM judge scores the answer against the
//! image's ground-truth description.
//!
//! ## Pipeline Overview
//!
//! ```text
//! data/
//!  │
//!  ├─ 0. Render   PDFs → blurred page PNGs, word lists → text PNGs
//!  ├─ 1. Sources  manifest / word list → labeled image paths
//!  ├─ 2. Query    image + prompt → vision model (hosted or custom endpoint)
//!  ├─ 3. Cases    answer + expected description + context
//!  └─ 4. Judge    hallucination / correctness scores → report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vision_attack_eval::{evaluate_text_images, EvalSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Without `api_key` the judge reads OPENAI_API_KEY; "llava" is served by the custom endpoint.
//!     let settings = EvalSettings::default();
//!     let output = evaluate_text_images("animals.txt", "What do you see?", "llava", &settings).await?;
//!     for case in &output.report.cases {
//!         println!("{}: {:?}", case.case.identifier, case.metrics[0].passed());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Model Routing
//!
//! | Model name | Backend |
//! |------------|---------|
//! | `gpt-*` | hosted provider via `edgequake-llm` (`api_key`, else `OPENAI_API_KEY`) |
//! | anything else | OpenAI-compatible endpoint, default `http://localhost:1143/v1` |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `attack-eval` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod evaluate;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod render;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EvalSettings, EvalSettingsBuilder, SourceKind};
pub use error::{CaseError, EvalError, ModelError};
pub use evaluate::{evaluate_pdfs, evaluate_text_images, run, run_with, write_report};
pub use pipeline::cases::TestCase;
pub use pipeline::judge::{JudgeModel, ProviderJudge};
pub use pipeline::sources::ImageSource;
pub use pipeline::vision::{VisionAnswer, VisionBackend, VisionClient, ERROR_SENTINEL};
pub use progress::{EvalProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{
    CaseResult, EvaluationReport, MetricKind, MetricOutcome, MetricResult, MetricSummary,
    RunOutput,
};
