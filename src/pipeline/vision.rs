//! Vision queries: send one image plus a prompt, get the model's description.
//!
//! ## Routing
//!
//! Model names starting with a hosted prefix (`gpt` by default) go to the
//! hosted provider through `edgequake-llm`; every other name goes to the
//! custom OpenAI-compatible endpoint (Ollama, vLLM, LM Studio, …) over plain
//! HTTP. Both sides implement [`VisionBackend`], so the retry and fallback
//! logic below is shared.
//!
//! ## Failure contract
//!
//! [`VisionClient::query`] never returns an error. Transport failures are
//! retried with exponential backoff (`retry_backoff_ms * 2^attempt`); a
//! response without text is not retried. Either way the caller gets a
//! [`VisionAnswer::Failed`] whose output is the `"ERROR"` sentinel, so one bad
//! image never halts a batch.

use crate::config::EvalSettings;
use crate::error::{EvalError, ModelError};
use crate::pipeline::encode::{data_url, encode_image_bytes};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, OpenAIProvider, ProviderFactory,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Output recorded for a test case whose vision query produced no text.
pub const ERROR_SENTINEL: &str = "ERROR";

/// `edgequake-llm` provider serving hosted model names.
pub const HOSTED_PROVIDER: &str = "openai";

/// Outcome of one vision query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum VisionAnswer {
    /// The model answered with this text.
    Text { text: String },
    /// No usable text; `reason` says why.
    Failed { reason: String },
}

impl VisionAnswer {
    /// The string fed to judgment: the answer, or [`ERROR_SENTINEL`].
    pub fn output(&self) -> &str {
        match self {
            VisionAnswer::Text { text } => text,
            VisionAnswer::Failed { .. } => ERROR_SENTINEL,
        }
    }

    /// Why the query failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        match self {
            VisionAnswer::Text { .. } => None,
            VisionAnswer::Failed { reason } => Some(reason),
        }
    }
}

/// Which backend serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Hosted,
    Custom,
}

/// One backend able to answer a single-turn image + prompt request.
///
/// `Ok(None)` means the backend answered without any text.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageData,
    ) -> Result<Option<String>, ModelError>;
}

// ── Hosted backend ───────────────────────────────────────────────────────

/// Build the hosted `edgequake-llm` provider for `model`.
///
/// An explicit key is used as given; without one the provider factory falls
/// back to `OPENAI_API_KEY`.
pub fn hosted_provider(
    api_key: Option<&str>,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, String> {
    match api_key {
        Some(key) => {
            let provider: Arc<dyn LLMProvider> =
                Arc::new(OpenAIProvider::new(key).with_model(model));
            Ok(provider)
        }
        None => ProviderFactory::create_llm_provider(HOSTED_PROVIDER, model)
            .map_err(|e| format!("{e}")),
    }
}

/// Hosted vision models through `edgequake-llm`.
pub struct HostedBackend {
    api_key: Option<String>,
    max_tokens: usize,
}

impl HostedBackend {
    pub fn new(api_key: Option<String>, max_tokens: usize) -> Self {
        Self {
            api_key,
            max_tokens,
        }
    }
}

#[async_trait]
impl VisionBackend for HostedBackend {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageData,
    ) -> Result<Option<String>, ModelError> {
        let provider = hosted_provider(self.api_key.as_deref(), model).map_err(|detail| {
            ModelError::Provider {
                provider: HOSTED_PROVIDER.to_string(),
                detail,
            }
        })?;

        let messages = vec![ChatMessage::user_with_images(prompt, vec![image.clone()])];
        let options = CompletionOptions {
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::Llm(format!("{e}")))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            model, response.prompt_tokens, response.completion_tokens
        );

        Ok(non_empty(response.content))
    }
}

// ── Custom OpenAI-compatible backend ─────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Any OpenAI-compatible `/chat/completions` endpoint.
pub struct CompatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: usize,
}

impl CompatBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, max_tokens: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            max_tokens,
        }
    }

    /// `<base>/chat/completions`; the base already carries its `/v1`.
    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl VisionBackend for CompatBackend {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageData,
    ) -> Result<Option<String>, ModelError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatTurn {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(image),
                        },
                    },
                ],
            }],
            max_tokens: Some(self.max_tokens),
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_chat_response(&body)
    }
}

/// First choice's text, or `None` when there is no choice or no text.
fn parse_chat_response(body: &str) -> Result<Option<String>, ModelError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .and_then(non_empty))
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Routes queries to the right backend and applies the failure contract.
pub struct VisionClient {
    hosted: Arc<dyn VisionBackend>,
    custom: Arc<dyn VisionBackend>,
    settings: EvalSettings,
}

impl VisionClient {
    /// Production client: `edgequake-llm` for hosted models, HTTP for the rest.
    pub fn from_settings(settings: &EvalSettings) -> Self {
        Self::with_backends(
            Arc::new(HostedBackend::new(
                settings.api_key.clone(),
                settings.max_tokens,
            )),
            Arc::new(CompatBackend::new(
                settings.custom_endpoint.clone(),
                settings.api_key.clone(),
                settings.max_tokens,
            )),
            settings,
        )
    }

    /// Client over caller-supplied backends.
    pub fn with_backends(
        hosted: Arc<dyn VisionBackend>,
        custom: Arc<dyn VisionBackend>,
        settings: &EvalSettings,
    ) -> Self {
        Self {
            hosted,
            custom,
            settings: settings.clone(),
        }
    }

    pub fn route(&self, model: &str) -> Route {
        if self.settings.is_hosted_model(model) {
            Route::Hosted
        } else {
            Route::Custom
        }
    }

    /// Describe raw image bytes. Undecodable bytes yield a failed answer.
    pub async fn query(&self, image_bytes: &[u8], prompt: &str, model: &str) -> VisionAnswer {
        match encode_image_bytes(image_bytes) {
            Ok(image) => self.query_encoded(&image, prompt, model).await,
            Err(e) => VisionAnswer::Failed {
                reason: format!("image encoding failed: {e}"),
            },
        }
    }

    /// Describe an already-encoded image.
    pub async fn query_encoded(&self, image: &ImageData, prompt: &str, model: &str) -> VisionAnswer {
        let route = self.route(model);
        let backend = match route {
            Route::Hosted => &self.hosted,
            Route::Custom => &self.custom,
        };
        info!("Sending vision query to {:?} backend for {}", route, model);

        let mut last_err = String::from("unknown error");

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let backoff = self.settings.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: vision retry {}/{} after {}ms",
                    model, attempt, self.settings.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = backend.describe(model, prompt, image);
            match timeout(Duration::from_secs(self.settings.api_timeout_secs), call).await {
                Ok(Ok(Some(text))) => return VisionAnswer::Text { text },
                Ok(Ok(None)) => {
                    error!("{}: vision model returned no text", model);
                    return VisionAnswer::Failed {
                        reason: "empty response".to_string(),
                    };
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", model, attempt + 1, e);
                    last_err = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        model,
                        attempt + 1,
                        self.settings.api_timeout_secs
                    );
                    last_err = format!("timed out after {}s", self.settings.api_timeout_secs);
                }
            }
        }

        error!("{}: vision query failed: {}", model, last_err);
        VisionAnswer::Failed { reason: last_err }
    }
}

/// Check the hosted provider can be built for `model` before any image is sent.
pub fn check_hosted_model(model: &str, settings: &EvalSettings) -> Result<(), EvalError> {
    hosted_provider(settings.api_key.as_deref(), model)
        .map(|_| ())
        .map_err(|e| EvalError::ProviderNotConfigured {
            provider: HOSTED_PROVIDER.to_string(),
            hint: format!("{e}\nSet OPENAI_API_KEY or pass --api-key to query '{model}'."),
        })
}
