//! Provider trait and implementations for LLM backends

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;
pub mod vertex;

use async_trait::async_trait;
use conflux_config::{ProviderConfig, StreamConfig};
use eventsource_stream::Eventsource;
use futures_util::{StreamExt, future};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::error::{LlmError, ProtocolError};
use crate::stream::{ChatCompletionStream, EventStream};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

/// Trait implemented by each LLM provider backend
///
/// Implementations hold no per-request state and may be shared across tasks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Send a non-streaming completion request
    async fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError>;

    /// Open a streaming completion
    async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, LlmError>;
}

/// Static set of models a provider accepts
#[derive(Debug, Clone)]
pub struct ModelAllowList {
    models: Vec<String>,
    match_family: bool,
}

impl ModelAllowList {
    /// Exact-match list of built-in models extended by configured ones
    pub fn new(builtin: &[&str], extra: &[String]) -> Self {
        Self {
            models: builtin.iter().map(|&m| m.to_owned()).chain(extra.iter().cloned()).collect(),
            match_family: false,
        }
    }

    /// List matched on the model family, ignoring any `:tag` suffix
    pub fn families(builtin: &[&str], extra: &[String]) -> Self {
        Self {
            match_family: true,
            ..Self::new(builtin, extra)
        }
    }

    /// Whether `model` is accepted
    pub fn contains(&self, model: &str) -> bool {
        let model = if self.match_family {
            model.split_once(':').map_or(model, |(family, _)| family)
        } else {
            model
        };
        self.models.iter().any(|m| m == model)
    }

    /// Reject `model` before any request is sent
    pub fn check(&self, provider: &str, model: &str) -> Result<(), LlmError> {
        if self.contains(model) {
            return Ok(());
        }

        tracing::debug!(provider, model, "rejecting unsupported model");
        Err(LlmError::UnsupportedModel {
            provider: provider.to_owned(),
            model: model.to_owned(),
        })
    }
}

/// Build the provider described by one `[providers.<name>]` table
pub fn build_provider(
    name: &str,
    config: &ProviderConfig,
    stream: &StreamConfig,
) -> Result<Box<dyn Provider>, LlmError> {
    tracing::debug!(provider = name, kind = config.kind(), "building provider");

    let provider: Box<dyn Provider> = match config {
        ProviderConfig::Openai(c) => Box::new(openai::OpenAiProvider::new(name.to_owned(), c)),
        ProviderConfig::AzureOpenai(c) => Box::new(openai::OpenAiProvider::azure(name.to_owned(), c)),
        ProviderConfig::Anthropic(c) => Box::new(anthropic::AnthropicProvider::new(name.to_owned(), c, stream)?),
        ProviderConfig::VertexAnthropic(c) => Box::new(vertex::VertexAnthropicProvider::new(name.to_owned(), c, stream)?),
        ProviderConfig::Google(c) => Box::new(google::GoogleProvider::new(name.to_owned(), c)),
        ProviderConfig::Ollama(c) => Box::new(ollama::OllamaProvider::new(name.to_owned(), c, stream)),
    };

    Ok(provider)
}

// -- Shared HTTP plumbing --

/// Vendor-specific decoding of an error body into `(code, message)`
pub(crate) type ErrorParser = fn(&str) -> Option<(Option<String>, String)>;

/// Send a request, turning transport failures and error statuses into `LlmError`
pub(crate) async fn send(provider: &str, builder: RequestBuilder, parse_error: ErrorParser) -> Result<Response, LlmError> {
    // request URLs may carry API keys
    let response = builder.send().await.map_err(|e| {
        let e = e.without_url();
        tracing::error!(provider = %provider, error = %e, "upstream request failed");
        LlmError::from(e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider = %provider, status = %status, "upstream returned error");

    let (code, message) = parse_error(&body).unwrap_or_else(|| {
        let message = if body.trim().is_empty() { status.to_string() } else { body };
        (None, message)
    });

    Err(LlmError::Api {
        provider: provider.to_owned(),
        status: Some(status.as_u16()),
        code,
        message,
    })
}

/// Read a JSON response body
pub(crate) async fn read_json<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T, LlmError> {
    response.json().await.map_err(|e| {
        tracing::error!(provider = %provider, error = %e, "failed to parse upstream response");
        LlmError::Transport(format!("failed to parse {provider} response: {e}"))
    })
}

/// Decode one stream payload, surfacing vendor error payloads as API errors
fn decode_event<E: DeserializeOwned>(
    provider: &'static str,
    data: &str,
    parse_error: ErrorParser,
) -> Result<E, LlmError> {
    if let Some((code, message)) = parse_error(data) {
        return Err(LlmError::Api {
            provider: provider.to_owned(),
            status: None,
            code,
            message,
        });
    }

    serde_json::from_str(data).map_err(|e| {
        tracing::debug!(provider, error = %e, data = %data, "undecodable stream payload");
        ProtocolError::MalformedEvent {
            provider,
            detail: e.to_string(),
        }
        .into()
    })
}

/// Decode the `data:` payloads of an SSE response, stopping at `[DONE]`
pub(crate) fn sse_events<E>(provider: &'static str, response: Response, parse_error: ErrorParser) -> EventStream<E>
where
    E: DeserializeOwned + Send + 'static,
{
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(reqwest::Error::without_url))
        .eventsource()
        .filter_map(|result| {
            future::ready(match result {
                Ok(event) => {
                    let data = event.data.trim();
                    (!data.is_empty()).then(|| Ok(data.to_owned()))
                }
                Err(e) => Some(Err(LlmError::Transport(e.to_string()))),
            })
        })
        .take_while(|item| future::ready(!matches!(item, Ok(data) if data == "[DONE]")))
        .map(move |item| item.and_then(|data| decode_event(provider, &data, parse_error)))
        .boxed()
}

/// Decode a newline-delimited JSON response body
pub(crate) fn ndjson_events<E>(provider: &'static str, response: Response, parse_error: ErrorParser) -> EventStream<E>
where
    E: DeserializeOwned + Send + 'static,
{
    let chunks = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.without_url())));
    let body = StreamReader::new(chunks);

    FramedRead::new(body, LinesCodec::new())
        .filter_map(move |line| {
            future::ready(match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(decode_event(provider, &line, parse_error)),
                Err(e) => Some(Err(LlmError::Transport(e.to_string()))),
            })
        })
        .boxed()
}
