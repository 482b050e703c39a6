//! Hugging Face Inference API provider.
//!
//! Text-to-image models on the hosted Inference API take a JSON body of the
//! form `{"inputs": "...", "parameters": {...}}` and answer with the raw image
//! bytes on success.

use crate::error::{parse_retry_after, sanitize_error_message, Result, SketchError};
use crate::image::provider::ImageProvider;
use crate::image::types::{GeneratedImage, GenerationMetadata, GenerationRequest, ImageFormat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";
const DEFAULT_API_KEY_ENV: &str = "HF_API_KEY";

/// Hosted text-to-image models.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HuggingFaceModel {
    /// Stable Diffusion 2 (default).
    #[default]
    StableDiffusion2,
    /// Stable Diffusion XL base 1.0.
    StableDiffusionXl,
    /// Any other model by repository ID (e.g., "owner/name").
    Custom(String),
}

impl HuggingFaceModel {
    /// Returns the model repository ID.
    pub fn as_str(&self) -> &str {
        match self {
            Self::StableDiffusion2 => "stabilityai/stable-diffusion-2",
            Self::StableDiffusionXl => "stabilityai/stable-diffusion-xl-base-1.0",
            Self::Custom(id) => id,
        }
    }
}

impl From<&str> for HuggingFaceModel {
    fn from(id: &str) -> Self {
        match id {
            "stabilityai/stable-diffusion-2" => Self::StableDiffusion2,
            "stabilityai/stable-diffusion-xl-base-1.0" => Self::StableDiffusionXl,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Where the bearer token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    Explicit(String),
    /// Read from the named environment variable on every request.
    Env(String),
}

impl Credential {
    fn resolve(&self) -> Result<String> {
        match self {
            Self::Explicit(key) if !key.is_empty() => Ok(key.clone()),
            Self::Explicit(_) => Err(SketchError::Auth("API key is empty".into())),
            Self::Env(var) => std::env::var(var)
                .ok()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| {
                    SketchError::Auth(format!("{var} not set and no API key provided"))
                }),
        }
    }
}

/// Builder for [`HuggingFaceProvider`].
#[derive(Debug, Clone)]
pub struct HuggingFaceProviderBuilder {
    credential: Credential,
    model: HuggingFaceModel,
    base_url: String,
}

impl Default for HuggingFaceProviderBuilder {
    fn default() -> Self {
        Self {
            credential: Credential::Env(DEFAULT_API_KEY_ENV.to_string()),
            model: HuggingFaceModel::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl HuggingFaceProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Without one, `HF_API_KEY` is read at request time.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.credential = Credential::Explicit(key.into());
        self
    }

    /// Reads the API key from `var` at request time instead of `HF_API_KEY`.
    pub fn api_key_env(mut self, var: impl Into<String>) -> Self {
        self.credential = Credential::Env(var.into());
        self
    }

    /// Sets the model.
    pub fn model(mut self, model: impl Into<HuggingFaceModel>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the Inference API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Builds the provider.
    pub fn build(self) -> Result<HuggingFaceProvider> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SketchError::InvalidRequest("base URL is empty".into()));
        }
        if self.model.as_str().is_empty() {
            return Err(SketchError::InvalidRequest("model ID is empty".into()));
        }

        Ok(HuggingFaceProvider {
            client: reqwest::Client::new(),
            credential: self.credential,
            model: self.model,
            base_url,
        })
    }
}

/// Hugging Face Inference API image provider.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    credential: Credential,
    model: HuggingFaceModel,
    base_url: String,
}

impl HuggingFaceProvider {
    /// Creates a new `HuggingFaceProviderBuilder`.
    pub fn builder() -> HuggingFaceProviderBuilder {
        HuggingFaceProviderBuilder::new()
    }

    /// Returns the configured model.
    pub fn model(&self) -> &HuggingFaceModel {
        &self.model
    }

    /// Returns the full inference URL for the configured model.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, self.model.as_str())
    }

    fn parse_error(
        &self,
        status: u16,
        text: &str,
        headers: &reqwest::header::HeaderMap,
    ) -> SketchError {
        let message = match serde_json::from_str::<HuggingFaceErrorResponse>(text) {
            Ok(body) => sanitize_error_message(&body.error),
            Err(_) => sanitize_error_message(text),
        };

        match status {
            401 | 403 => SketchError::Auth(message),
            429 => SketchError::RateLimited {
                retry_after: parse_retry_after(headers).map(Duration::from_secs),
            },
            _ => SketchError::Api { status, message },
        }
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let api_key = self.credential.resolve()?;
        let start = Instant::now();
        let url = self.endpoint();
        let body = HuggingFaceRequest::from_generation_request(request);

        tracing::debug!(
            url = %url,
            prompt_len = request.prompt.len(),
            negative = request.negative_prompt.is_some(),
            "submitting inference request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &text, &headers));
        }

        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(ImageFormat::from_content_type);

        let data = response.bytes().await?.to_vec();
        let duration_ms = start.elapsed().as_millis() as u64;
        let format = ImageFormat::from_magic_bytes(&data)
            .or(declared)
            .unwrap_or_default();

        tracing::debug!(
            size = data.len(),
            format = format.extension(),
            duration_ms,
            "inference complete"
        );

        Ok(GeneratedImage::new(
            data,
            format,
            GenerationMetadata {
                model: Some(self.model.as_str().to_string()),
                duration_ms: Some(duration_ms),
            },
        ))
    }

    fn name(&self) -> &str {
        "Hugging Face Inference API"
    }
}

#[derive(Debug, Serialize)]
struct HuggingFaceRequest<'a> {
    inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<HuggingFaceParameters<'a>>,
}

#[derive(Debug, Serialize)]
struct HuggingFaceParameters<'a> {
    negative_prompt: &'a str,
}

impl<'a> HuggingFaceRequest<'a> {
    fn from_generation_request(req: &'a GenerationRequest) -> Self {
        Self {
            inputs: &req.prompt,
            parameters: req
                .negative_prompt
                .as_deref()
                .map(|negative_prompt| HuggingFaceParameters { negative_prompt }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HuggingFaceErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    fn provider() -> HuggingFaceProvider {
        HuggingFaceProviderBuilder::new()
            .api_key("hf-test-key")
            .build()
            .unwrap()
    }

    #[test]
    fn test_model_as_str() {
        assert_eq!(
            HuggingFaceModel::StableDiffusion2.as_str(),
            "stabilityai/stable-diffusion-2"
        );
        assert_eq!(
            HuggingFaceModel::Custom("owner/sketchy".into()).as_str(),
            "owner/sketchy"
        );
        assert_eq!(
            HuggingFaceModel::default(),
            HuggingFaceModel::StableDiffusion2
        );
    }

    #[test]
    fn test_model_from_id() {
        assert_eq!(
            HuggingFaceModel::from("stabilityai/stable-diffusion-xl-base-1.0"),
            HuggingFaceModel::StableDiffusionXl
        );
        assert_eq!(
            HuggingFaceModel::from("owner/sketchy"),
            HuggingFaceModel::Custom("owner/sketchy".into())
        );
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(
            provider().endpoint(),
            "https://api-inference.huggingface.co/models/stabilityai/stable-diffusion-2"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = HuggingFaceProviderBuilder::new()
            .api_key("k")
            .base_url("http://127.0.0.1:9000/models/")
            .model("owner/sketchy")
            .build()
            .unwrap();
        assert_eq!(provider.endpoint(), "http://127.0.0.1:9000/models/owner/sketchy");
    }

    #[test]
    fn test_builder_rejects_empty_base_url() {
        let result = HuggingFaceProviderBuilder::new().base_url("/").build();
        assert!(matches!(result, Err(SketchError::InvalidRequest(_))));
    }

    #[test]
    fn test_credential_read_at_call_time() {
        let var = "FACESKETCH_TEST_KEY_CALL_TIME";
        std::env::remove_var(var);
        let credential = Credential::Env(var.into());
        assert!(matches!(credential.resolve(), Err(SketchError::Auth(_))));

        std::env::set_var(var, "hf-late-key");
        assert_eq!(credential.resolve().unwrap(), "hf-late-key");
        std::env::remove_var(var);
    }

    #[test]
    fn test_empty_credential_rejected() {
        assert!(Credential::Explicit(String::new()).resolve().is_err());

        let var = "FACESKETCH_TEST_KEY_EMPTY";
        std::env::set_var(var, "");
        assert!(Credential::Env(var.into()).resolve().is_err());
        std::env::remove_var(var);
    }

    #[test]
    fn test_request_body_without_negative_prompt() {
        let req = GenerationRequest::new("a face, pencil sketch style");
        let json = serde_json::to_value(HuggingFaceRequest::from_generation_request(&req)).unwrap();
        assert_eq!(json, serde_json::json!({ "inputs": "a face, pencil sketch style" }));
    }

    #[test]
    fn test_request_body_with_negative_prompt() {
        let req = GenerationRequest::new("a face").with_negative_prompt("color, blurry");
        let json = serde_json::to_value(HuggingFaceRequest::from_generation_request(&req)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "inputs": "a face",
                "parameters": { "negative_prompt": "color, blurry" }
            })
        );
    }

    #[test]
    fn test_parse_error_auth() {
        let err = provider().parse_error(401, r#"{"error": "Invalid token"}"#, &HeaderMap::new());
        match err {
            SketchError::Auth(msg) => assert_eq!(msg, "Invalid token"),
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        let err = provider().parse_error(429, "slow down", &headers);
        assert!(matches!(
            err,
            SketchError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_parse_error_model_loading() {
        let body = r#"{"error": "Model stabilityai/stable-diffusion-2 is currently loading", "estimated_time": 20.0}"#;
        let err = provider().parse_error(503, body, &HeaderMap::new());
        match err {
            SketchError::Api { status, message } => {
                assert_eq!(status, 503);
                assert!(message.contains("currently loading"));
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_plain_text() {
        let err = provider().parse_error(500, "Internal  Server\nError", &HeaderMap::new());
        assert_eq!(err.to_string(), "API error: 500 - Internal Server Error");
    }
}
