//! Google Generative Language API provider implementation

use async_trait::async_trait;
use conflux_config::GoogleConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ModelAllowList, Provider, read_json, send, sse_events};
use crate::convert::google::GoogleStreamNormalizer;
use crate::error::LlmError;
use crate::protocol::google::{GoogleErrorResponse, GoogleRequest, GoogleResponse};
use crate::stream::{ChatCompletionStream, normalized};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

/// Default Google Generative Language API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Models accepted without configuration
pub const MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite-001",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro",
];

const KIND: &str = "google";

/// Google Generative Language API provider
pub struct GoogleProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: SecretString,
    models: ModelAllowList,
}

impl GoogleProvider {
    /// Create from provider configuration
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never happen).
    pub fn new(name: String, config: &GoogleConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL"));

        Self {
            name,
            client: Client::new(),
            base_url,
            api_key: config.api_key.clone(),
            models: ModelAllowList::new(MODELS, &config.extra_models),
        }
    }

    /// Build the `generateContent` endpoint URL for a model
    fn generate_url(&self, model: &str) -> Result<Url, LlmError> {
        let mut url = self.model_url(model, "generateContent")?;
        url.query_pairs_mut().append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    /// Build the `streamGenerateContent` endpoint URL for a model
    fn stream_url(&self, model: &str) -> Result<Url, LlmError> {
        let mut url = self.model_url(model, "streamGenerateContent")?;
        url.query_pairs_mut()
            .append_pair("alt", "sse")
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    fn model_url(&self, model: &str, method: &str) -> Result<Url, LlmError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/models/{model}:{method}"))
            .map_err(|e| LlmError::InvalidRequest(format!("cannot build endpoint for model '{model}': {e}")))
    }
}

/// Parse `{"error": {"code", "message", "status"}}`
fn parse_error(body: &str) -> Option<(Option<String>, String)> {
    let response: GoogleErrorResponse = serde_json::from_str(body).ok()?;
    Some((response.error.status, response.error.message))
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let body = GoogleRequest::try_from(request)?;
        let builder = self.client.post(self.generate_url(&request.model)?).json(&body);
        let response = send(&self.name, builder, parse_error).await?;
        let wire_response: GoogleResponse = read_json(&self.name, response).await?;

        let mut response = ChatCompletionResponse::try_from(wire_response)?;
        if response.model.is_empty() {
            response.model.clone_from(&request.model);
        }
        Ok(response)
    }

    async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let body = GoogleRequest::try_from(request)?;
        let builder = self.client.post(self.stream_url(&request.model)?).json(&body);
        let response = send(&self.name, builder, parse_error).await?;
        tracing::debug!(provider = %self.name, model = %request.model, "stream opened");

        let events = sse_events::<GoogleResponse>(KIND, response, parse_error);
        Ok(ChatCompletionStream::new(normalized(
            events,
            GoogleStreamNormalizer::new(request.model.clone()),
        )))
    }
}
