//! Error types for the vision-attack-eval library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EvalError`] — **Fatal**: the run cannot proceed at all (missing
//!   manifest, unresolvable image, provider not configured). Returned as
//!   `Err(EvalError)` from the top-level `run*` functions before or instead
//!   of a report.
//!
//! * [`CaseError`] — **Non-fatal**: one judgment failed (judge API error,
//!   timeout, unparsable verdict) but every other case is fine. Stored inside
//!   [`crate::report::MetricResult`] so a single bad judgment never loses the
//!   whole batch.
//!
//! Vision-query failures are neither: they are recovered inline into the
//! `"ERROR"` sentinel and recorded on the [`crate::pipeline::cases::TestCase`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the vision-attack-eval library.
#[derive(Debug, Error)]
pub enum EvalError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The PDF description manifest does not exist.
    #[error("PDF descriptions file not found: '{path}'")]
    ManifestNotFound { path: PathBuf },

    /// The manifest exists but is not a JSON list of `{filename, description}`.
    #[error("PDF descriptions file '{path}' is invalid: {detail}")]
    ManifestInvalid { path: PathBuf, detail: String },

    /// The word list does not exist.
    #[error("Words file not found: '{path}'")]
    WordListNotFound { path: PathBuf },

    /// No image resolves for a source.
    #[error("Image not found for '{identifier}' (looked in '{searched}')")]
    ImageNotFound { identifier: String, searched: PathBuf },

    /// More than one image matches a manifest entry.
    #[error("Image for '{identifier}' is ambiguous: {} candidates ({})", .candidates.len(), join_paths(.candidates))]
    AmbiguousImage {
        identifier: String,
        candidates: Vec<PathBuf>,
    },

    /// The image exists but cannot be decoded.
    #[error("Image '{path}' could not be decoded: {detail}")]
    ImageUnreadable { path: PathBuf, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The hosted provider or judge could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    /// pdfium failed to open or rasterise a document.
    #[error("Rendering '{path}' failed: {detail}")]
    RenderFailed { path: PathBuf, detail: String },

    /// The TrueType font used for text images could not be loaded.
    #[error("Failed to load font '{path}': {detail}\nSet ATTACK_FONT_PATH to a .ttf file.")]
    FontLoadFailed { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a file failed.
    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write the JSON report.
    #[error("Failed to write report '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failed call to a vision or judge model.
///
/// Never escapes the pipeline: vision failures become the `"ERROR"`
/// sentinel and judge failures become a [`CaseError`].
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The provider could not be constructed for this model.
    #[error("provider '{provider}' unavailable: {detail}")]
    Provider { provider: String, detail: String },

    /// Transport-level failure (connection refused, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider reported an error.
    #[error("LLM API error: {0}")]
    Llm(String),

    /// The body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Http(err.to_string())
    }
}

/// A non-fatal error for a single judgment.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum CaseError {
    /// The judge call failed after retries.
    #[error("judge call failed after {retries} retries: {detail}")]
    JudgeFailed { retries: u32, detail: String },

    /// The judge call timed out.
    #[error("judge call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The judge answered, but not with a usable verdict.
    #[error("unparsable judge verdict: {detail}")]
    InvalidVerdict { detail: String },
}
