//! Test-case building: one vision query per image source.
//!
//! Every image is read and decoded up front, so a missing or corrupt image
//! aborts the run before any model is called. Queries then run with bounded
//! concurrency (`settings.concurrency`, 1 = strictly sequential) and the
//! resulting cases keep the order of their sources.

use crate::config::EvalSettings;
use crate::error::EvalError;
use crate::pipeline::encode::encode_image_bytes;
use crate::pipeline::sources::ImageSource;
use crate::pipeline::vision::{VisionAnswer, VisionClient};
use edgequake_llm::ImageData;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One judged example: what the model said next to what the image shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Identifier of the source image.
    pub identifier: String,
    /// Prompt shown to the vision model.
    pub prompt: String,
    /// Model answer, or `"ERROR"`.
    pub actual_output: String,
    /// Ground-truth description.
    pub expected_output: String,
    /// Reference passages the judge checks `actual_output` against.
    pub context: Vec<String>,
    /// Why the vision query failed, when `actual_output` is the sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_error: Option<String>,
}

impl TestCase {
    /// Assemble a case from a source and the model's answer.
    ///
    /// The context always holds exactly the expected description.
    pub fn new(source: &ImageSource, prompt: &str, answer: VisionAnswer) -> Self {
        Self {
            identifier: source.identifier.clone(),
            prompt: prompt.to_string(),
            actual_output: answer.output().to_string(),
            expected_output: source.expected_description.clone(),
            context: vec![source.expected_description.clone()],
            vision_error: answer.failure().map(str::to_string),
        }
    }

    /// Whether the vision query failed and the output is the sentinel.
    pub fn vision_failed(&self) -> bool {
        self.vision_error.is_some()
    }
}

/// Read and decode every source image.
///
/// Fails on the first missing or undecodable image.
pub fn load_images(sources: &[ImageSource]) -> Result<Vec<ImageData>, EvalError> {
    sources
        .iter()
        .map(|source| {
            let bytes = source.load_bytes()?;
            encode_image_bytes(&bytes).map_err(|e| EvalError::ImageUnreadable {
                path: source.image_locator.clone(),
                detail: e.to_string(),
            })
        })
        .collect()
}

/// Query `model` once per source and build the test cases, in source order.
pub async fn build_test_cases(
    client: &VisionClient,
    sources: &[ImageSource],
    prompt: &str,
    model: &str,
    settings: &EvalSettings,
) -> Result<Vec<TestCase>, EvalError> {
    let images = load_images(sources)?;
    let total = sources.len();

    if let Some(ref cb) = settings.progress_callback {
        cb.on_queries_start(total);
    }
    info!(
        "Querying {} with {} images (concurrency {})",
        model, total, settings.concurrency
    );

    let cases: Vec<TestCase> = stream::iter(sources.iter().zip(images.iter()).enumerate().map(
        |(index, (source, image))| async move {
            let answer = client.query_encoded(image, prompt, model).await;
            let case = TestCase::new(source, prompt, answer);
            if let Some(ref cb) = settings.progress_callback {
                cb.on_query_complete(index, total, &case.identifier, case.vision_failed());
            }
            case
        },
    ))
    .buffered(settings.concurrency.max(1))
    .collect()
    .await;

    let failed = cases.iter().filter(|c| c.vision_failed()).count();
    if failed > 0 {
        info!("{} of {} vision queries returned no text", failed, total);
    }
    Ok(cases)
}
