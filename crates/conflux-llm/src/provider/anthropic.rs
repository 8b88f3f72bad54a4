//! Anthropic Messages API provider implementation

use async_trait::async_trait;
use conflux_config::{AnthropicConfig, StreamConfig};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ModelAllowList, Provider, read_json, send, sse_events};
use crate::convert::anthropic::AnthropicStreamNormalizer;
use crate::error::LlmError;
use crate::protocol::anthropic::{AnthropicErrorResponse, AnthropicRequest, AnthropicResponse, AnthropicStreamEvent};
use crate::stream::ChatCompletionStream;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const API_VERSION: &str = "2023-06-01";

/// Models accepted without configuration
pub const MODELS: &[&str] = &[
    "claude-2.0",
    "claude-2.1",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-5-sonnet-20240620",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-sonnet-latest",
    "claude-3-haiku-20240307",
    "claude-3-5-haiku-latest",
    "claude-3-5-haiku-20241022",
];

const KIND: &str = "anthropic";

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: SecretString,
    betas: Option<String>,
    models: ModelAllowList,
    queue_capacity: usize,
}

impl AnthropicProvider {
    /// Create from provider configuration
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Config` if a beta flag cannot be sent as a header value.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never happen).
    pub fn new(name: String, config: &AnthropicConfig, stream: &StreamConfig) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL"));

        Ok(Self {
            name,
            client: Client::new(),
            base_url,
            api_key: config.api_key.clone(),
            betas: beta_header(&config.betas)?,
            models: ModelAllowList::new(MODELS, &config.extra_models),
            queue_capacity: stream.queue_capacity,
        })
    }

    /// Build the messages endpoint URL
    fn messages_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/messages")
    }

    fn request(&self, body: &AnthropicRequest) -> RequestBuilder {
        let builder = self
            .client
            .post(self.messages_url())
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(body);

        with_betas(builder, self.betas.as_deref())
    }
}

/// Join beta flags into one `anthropic-beta` header value
pub(crate) fn beta_header(betas: &[String]) -> Result<Option<String>, LlmError> {
    if betas.is_empty() {
        return Ok(None);
    }

    let value = betas.join(",");
    reqwest::header::HeaderValue::from_str(&value)
        .map_err(|e| LlmError::Config(format!("invalid anthropic beta flags '{value}': {e}")))?;

    Ok(Some(value))
}

pub(crate) fn with_betas(builder: RequestBuilder, betas: Option<&str>) -> RequestBuilder {
    match betas {
        Some(betas) => builder.header("anthropic-beta", betas),
        None => builder,
    }
}

/// Parse `{"type": "error", "error": {"type", "message"}}`
pub(crate) fn parse_error(body: &str) -> Option<(Option<String>, String)> {
    let response: AnthropicErrorResponse = serde_json::from_str(body).ok()?;
    Some((Some(response.error.error_type), response.error.message))
}

/// Read a unary Messages API response
pub(crate) async fn read_response(provider: &str, response: Response) -> Result<ChatCompletionResponse, LlmError> {
    let wire_response: AnthropicResponse = read_json(provider, response).await?;
    ChatCompletionResponse::try_from(wire_response)
}

/// Bridge a Messages API event stream through the bounded queue
pub(crate) fn bridge_stream(response: Response, queue_capacity: usize) -> ChatCompletionStream {
    let events = sse_events::<AnthropicStreamEvent>(KIND, response, parse_error);
    ChatCompletionStream::bridged(events, AnthropicStreamNormalizer::new(), queue_capacity)
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let body = AnthropicRequest::try_from(request)?;
        let response = send(&self.name, self.request(&body), parse_error).await?;

        read_response(&self.name, response).await
    }

    async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let mut body = AnthropicRequest::try_from(request)?;
        body.stream = Some(true);

        let response = send(&self.name, self.request(&body), parse_error).await?;
        tracing::debug!(provider = %self.name, model = %request.model, "stream opened");

        Ok(bridge_stream(response, self.queue_capacity))
    }
}
