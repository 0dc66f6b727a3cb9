//! Configuration for attack-image rendering and evaluation runs.
//!
//! Every knob lives in [`EvalSettings`], built once at process start via
//! [`EvalSettingsBuilder`] and handed by reference to each component. No
//! component reads the environment directly; the CLI maps flags and
//! environment variables onto the builder.

use crate::error::EvalError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Judge model used when none is configured.
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o";

/// Custom OpenAI-compatible endpoint used for non-hosted vision models.
pub const DEFAULT_CUSTOM_ENDPOINT: &str = "http://localhost:1143/v1";

/// Prompt sent with every image when the caller does not supply one.
pub const DEFAULT_VISION_PROMPT: &str = "What do you see?";

/// Vision model evaluated when the caller does not name one.
pub const DEFAULT_TEST_MODEL: &str = "llava";

/// Settings for a rendering or evaluation run.
///
/// # Example
/// ```rust
/// use vision_attack_eval::EvalSettings;
///
/// let settings = EvalSettings::builder()
///     .data_path("./data")
///     .judge_model("gpt-4o-mini")
///     .concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(settings.attack_images_path, std::path::PathBuf::from("./data/attack_images"));
/// ```
#[derive(Clone)]
pub struct EvalSettings {
    /// API key for the hosted provider and the custom endpoint (`OPENAI_API_KEY`).
    pub api_key: Option<String>,

    /// Judge model identifier. Default: `gpt-4o`.
    pub judge_model: String,

    /// Judge sampling temperature. Default: 0.1.
    pub judge_temperature: f32,

    /// Base URL of the OpenAI-compatible endpoint serving non-hosted models.
    pub custom_endpoint: String,

    /// Model-name prefixes routed to the hosted provider. Default: `["gpt"]`.
    pub hosted_prefixes: Vec<String>,

    /// Root of manifests and word lists. Default: `./data`.
    pub data_path: PathBuf,

    /// Root of rendered attack images. Default: `<data_path>/attack_images`.
    pub attack_images_path: PathBuf,

    /// Concurrent vision queries while building test cases. Default: 4.
    ///
    /// Set to 1 to query images strictly one after another.
    pub concurrency: usize,

    /// Concurrent judge calls. Default: 8.
    pub judge_concurrency: usize,

    /// Retries on a failed vision or judge call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for vision and judge requests in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Maximum tokens a vision model may generate per image. Default: 1024.
    pub max_tokens: usize,

    /// Pass/fail threshold shared by all metrics. Default: 0.5.
    pub threshold: f64,

    /// TrueType font used for text attack images.
    pub font_path: PathBuf,

    /// Directory containing libpdfium. `None` binds the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for EvalSettings {
    fn default() -> Self {
        let data_path = PathBuf::from("data");
        Self {
            api_key: None,
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            judge_temperature: 0.1,
            custom_endpoint: DEFAULT_CUSTOM_ENDPOINT.to_string(),
            hosted_prefixes: vec!["gpt".to_string()],
            attack_images_path: data_path.join("attack_images"),
            data_path,
            concurrency: 4,
            judge_concurrency: 8,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            max_tokens: 1024,
            threshold: 0.5,
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for EvalSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("judge_model", &self.judge_model)
            .field("judge_temperature", &self.judge_temperature)
            .field("custom_endpoint", &self.custom_endpoint)
            .field("hosted_prefixes", &self.hosted_prefixes)
            .field("data_path", &self.data_path)
            .field("attack_images_path", &self.attack_images_path)
            .field("concurrency", &self.concurrency)
            .field("judge_concurrency", &self.judge_concurrency)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("threshold", &self.threshold)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn EvalProgressCallback>"),
            )
            .finish()
    }
}

impl EvalSettings {
    /// Create a new builder for `EvalSettings`.
    pub fn builder() -> EvalSettingsBuilder {
        EvalSettingsBuilder {
            settings: Self::default(),
            attack_images_overridden: false,
        }
    }

    /// `<data>/pdf` — input PDFs and the description manifest.
    pub fn pdf_data_dir(&self) -> PathBuf {
        self.data_path.join("pdf")
    }

    /// `<data>/pdf/pdf_descriptions.json`.
    pub fn pdf_manifest_path(&self) -> PathBuf {
        self.pdf_data_dir().join("pdf_descriptions.json")
    }

    /// `<data>/txt` — word lists.
    pub fn text_data_dir(&self) -> PathBuf {
        self.data_path.join("txt")
    }

    /// `<attack_images>/pdf` — rendered PDF pages.
    pub fn pdf_images_dir(&self) -> PathBuf {
        self.attack_images_path.join("pdf")
    }

    /// `<attack_images>/txt/<source>` — rendered words of one word list.
    pub fn text_images_dir(&self, source: &str) -> PathBuf {
        self.attack_images_path.join("txt").join(source)
    }

    /// Resolve a user-supplied word list path.
    ///
    /// Existing paths are used as given; anything else is looked up under
    /// `<data>/txt`, so `--words-file animals.txt` works from any directory.
    pub fn resolve_word_list(&self, path: &Path) -> PathBuf {
        if path.exists() || path.is_absolute() {
            path.to_path_buf()
        } else {
            self.text_data_dir().join(path)
        }
    }

    /// Whether `model` is served by the hosted provider.
    pub fn is_hosted_model(&self, model: &str) -> bool {
        self.hosted_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && model.starts_with(prefix.as_str()))
    }
}

/// Builder for [`EvalSettings`].
#[derive(Debug)]
pub struct EvalSettingsBuilder {
    settings: EvalSettings,
    attack_images_overridden: bool,
}

impl EvalSettingsBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.settings.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn judge_model(mut self, model: impl Into<String>) -> Self {
        self.settings.judge_model = model.into();
        self
    }

    pub fn judge_temperature(mut self, t: f32) -> Self {
        self.settings.judge_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn custom_endpoint(mut self, url: impl Into<String>) -> Self {
        self.settings.custom_endpoint = url.into();
        self
    }

    pub fn hosted_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.hosted_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the data root. Unless overridden, the attack-image root follows it.
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.data_path = path.into();
        if !self.attack_images_overridden {
            self.settings.attack_images_path = self.settings.data_path.join("attack_images");
        }
        self
    }

    pub fn attack_images_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.attack_images_path = path.into();
        self.attack_images_overridden = true;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.settings.concurrency = n.max(1);
        self
    }

    pub fn judge_concurrency(mut self, n: usize) -> Self {
        self.settings.judge_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.settings.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.settings.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.api_timeout_secs = secs;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.settings.max_tokens = n;
        self
    }

    pub fn threshold(mut self, t: f64) -> Self {
        self.settings.threshold = t;
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.font_path = path.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.settings.progress_callback = Some(cb);
        self
    }

    /// Build the settings, validating constraints.
    pub fn build(self) -> Result<EvalSettings, EvalError> {
        let s = &self.settings;
        if s.judge_model.trim().is_empty() {
            return Err(EvalError::InvalidConfig("judge model must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&s.threshold) {
            return Err(EvalError::InvalidConfig(format!(
                "threshold must be within 0.0–1.0, got {}",
                s.threshold
            )));
        }
        if !s.custom_endpoint.starts_with("http://") && !s.custom_endpoint.starts_with("https://") {
            return Err(EvalError::InvalidConfig(format!(
                "custom endpoint must be an http(s) URL, got '{}'",
                s.custom_endpoint
            )));
        }
        if s.api_timeout_secs == 0 {
            return Err(EvalError::InvalidConfig("API timeout must be ≥ 1s".into()));
        }
        Ok(self.settings)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which attack-image collection a run evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceKind {
    /// Rendered PDF pages described by `<data>/pdf/pdf_descriptions.json`.
    Pdf,
    /// Rendered lines of one word list.
    Text { words_file: PathBuf },
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Pdf => write!(f, "pdf"),
            SourceKind::Text { words_file } => write!(f, "text ({})", words_file.display()),
        }
    }
}
