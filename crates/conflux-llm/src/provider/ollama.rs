//! Ollama chat API provider implementation

use async_trait::async_trait;
use conflux_config::{OllamaConfig, StreamConfig};
use reqwest::{Client, RequestBuilder};
use url::Url;

use super::{ModelAllowList, Provider, ndjson_events, read_json, send};
use crate::convert::ollama::OllamaStreamNormalizer;
use crate::error::LlmError;
use crate::protocol::ollama::{OllamaChatResponse, OllamaErrorResponse, OllamaRequest};
use crate::stream::ChatCompletionStream;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

/// Model families accepted without configuration, matched ignoring `:tag`
pub const MODELS: &[&str] = &["llama3.2", "llama3.1", "mistral", "qwen2.5", "gemma2", "phi3"];

const KIND: &str = "ollama";

/// Local Ollama server provider
pub struct OllamaProvider {
    name: String,
    client: Client,
    host: Url,
    models: ModelAllowList,
    queue_capacity: usize,
}

impl OllamaProvider {
    /// Create from provider configuration
    pub fn new(name: String, config: &OllamaConfig, stream: &StreamConfig) -> Self {
        Self {
            name,
            client: Client::new(),
            host: config.host.clone(),
            models: ModelAllowList::families(MODELS, &config.extra_models),
            queue_capacity: stream.queue_capacity,
        }
    }

    /// Build the chat endpoint URL
    fn chat_url(&self) -> String {
        let base = self.host.as_str().trim_end_matches('/');
        format!("{base}/api/chat")
    }

    fn request(&self, body: &OllamaRequest) -> RequestBuilder {
        self.client.post(self.chat_url()).json(body)
    }
}

/// Parse `{"error": "..."}`
fn parse_error(body: &str) -> Option<(Option<String>, String)> {
    let response: OllamaErrorResponse = serde_json::from_str(body).ok()?;
    Some((None, response.error))
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let body = OllamaRequest::try_from(request)?;
        let response = send(&self.name, self.request(&body), parse_error).await?;
        let wire_response: OllamaChatResponse = read_json(&self.name, response).await?;

        ChatCompletionResponse::try_from(wire_response)
    }

    async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let mut body = OllamaRequest::try_from(request)?;
        body.stream = true;

        let response = send(&self.name, self.request(&body), parse_error).await?;
        tracing::debug!(provider = %self.name, model = %request.model, "stream opened");

        let events = ndjson_events::<OllamaChatResponse>(KIND, response, parse_error);
        Ok(ChatCompletionStream::bridged(
            events,
            OllamaStreamNormalizer::new(request.model.clone()),
            self.queue_capacity,
        ))
    }
}
