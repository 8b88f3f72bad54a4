//! `OpenAI` and Azure `OpenAI` provider implementation

use async_trait::async_trait;
use conflux_config::{AzureOpenAiConfig, OpenAiConfig};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ModelAllowList, Provider, read_json, send, sse_events};
use crate::convert::openai::OpenAiStreamNormalizer;
use crate::error::LlmError;
use crate::protocol::openai::{OpenAiErrorResponse, OpenAiRequest, OpenAiResponse, OpenAiStreamChunk};
use crate::stream::{ChatCompletionStream, normalized};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Models accepted without configuration
pub const MODELS: &[&str] = &["o3-mini", "gpt-4o", "gpt-4o-mini"];

const KIND: &str = "openai";

enum Endpoint {
    OpenAi { base_url: Url },
    Azure { endpoint: Url, api_version: String },
}

/// OpenAI-compatible provider, also serving Azure deployments
pub struct OpenAiProvider {
    name: String,
    client: Client,
    endpoint: Endpoint,
    api_key: SecretString,
    models: ModelAllowList,
}

impl OpenAiProvider {
    /// Create from `OpenAI` configuration
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never happen).
    pub fn new(name: String, config: &OpenAiConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL"));

        Self {
            name,
            client: Client::new(),
            endpoint: Endpoint::OpenAi { base_url },
            api_key: config.api_key.clone(),
            models: ModelAllowList::new(MODELS, &config.extra_models),
        }
    }

    /// Create from Azure `OpenAI` configuration
    ///
    /// Request models name Azure deployments.
    pub fn azure(name: String, config: &AzureOpenAiConfig) -> Self {
        Self {
            name,
            client: Client::new(),
            endpoint: Endpoint::Azure {
                endpoint: config.endpoint.clone(),
                api_version: config.api_version.clone(),
            },
            api_key: config.api_key.clone(),
            models: ModelAllowList::new(MODELS, &config.extra_models),
        }
    }

    /// Build the chat completions URL
    fn completions_url(&self, model: &str) -> String {
        match &self.endpoint {
            Endpoint::OpenAi { base_url } => {
                let base = base_url.as_str().trim_end_matches('/');
                format!("{base}/chat/completions")
            }
            Endpoint::Azure { endpoint, api_version } => {
                let base = endpoint.as_str().trim_end_matches('/');
                format!("{base}/openai/deployments/{model}/chat/completions?api-version={api_version}")
            }
        }
    }

    fn request(&self, body: &OpenAiRequest) -> RequestBuilder {
        let builder = self.client.post(self.completions_url(&body.model)).json(body);

        match self.endpoint {
            Endpoint::OpenAi { .. } => builder.bearer_auth(self.api_key.expose_secret()),
            Endpoint::Azure { .. } => builder.header("api-key", self.api_key.expose_secret()),
        }
    }
}

/// Parse `{"error": {"message", "type", "code"}}`
fn parse_error(body: &str) -> Option<(Option<String>, String)> {
    let response: OpenAiErrorResponse = serde_json::from_str(body).ok()?;
    let code = match response.error.code {
        Some(serde_json::Value::String(code)) => Some(code),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    Some((code.or(response.error.error_type), response.error.message))
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let body = OpenAiRequest::from(request);
        let response = send(&self.name, self.request(&body), parse_error).await?;
        let wire_response: OpenAiResponse = read_json(&self.name, response).await?;

        ChatCompletionResponse::try_from(wire_response)
    }

    async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, LlmError> {
        self.models.check(&self.name, &request.model)?;

        let mut body = OpenAiRequest::from(request);
        body.stream = Some(true);

        let response = send(&self.name, self.request(&body), parse_error).await?;
        tracing::debug!(provider = %self.name, model = %request.model, "stream opened");

        let events = sse_events::<OpenAiStreamChunk>(KIND, response, parse_error);
        Ok(ChatCompletionStream::new(normalized(events, OpenAiStreamNormalizer::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputMessage;

    fn openai(base_url: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::new(
            "openai".to_owned(),
            &OpenAiConfig {
                api_key: SecretString::from("sk-test"),
                base_url: base_url.map(|u| Url::parse(u).unwrap()),
                extra_models: vec!["gpt-4.1".to_owned()],
            },
        )
    }

    #[test]
    fn default_completions_url() {
        assert_eq!(openai(None).completions_url("gpt-4o"), "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            openai(Some("http://localhost:8080/v1/")).completions_url("gpt-4o"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn azure_completions_url() {
        let provider = OpenAiProvider::azure(
            "azure".to_owned(),
            &AzureOpenAiConfig {
                api_key: SecretString::from("key"),
                endpoint: Url::parse("https://example.openai.azure.com").unwrap(),
                api_version: "2024-02-01".to_owned(),
                extra_models: Vec::new(),
            },
        );

        assert_eq!(
            provider.completions_url("gpt-4o"),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-01"
        );
    }

    #[tokio::test]
    async fn unsupported_model_is_rejected_locally() {
        // unroutable base URL: a network attempt would fail differently
        let provider = openai(Some("http://127.0.0.1:9/v1"));
        let request = ChatCompletionRequest::new("gpt-3.5-turbo", vec![InputMessage::user("hi")]);

        let err = provider.create_chat_completion(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedModel { .. }));

        let err = provider.create_chat_completion_stream(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedModel { .. }));
    }

    #[test]
    fn error_body_parsing() {
        let body = r#"{"error": {"message": "Rate limit", "type": "requests", "code": "rate_limit_exceeded"}}"#;
        assert_eq!(
            parse_error(body),
            Some((Some("rate_limit_exceeded".to_owned()), "Rate limit".to_owned()))
        );

        let body = r#"{"error": {"message": "Bad key", "type": "invalid_request_error", "code": null}}"#;
        assert_eq!(
            parse_error(body),
            Some((Some("invalid_request_error".to_owned()), "Bad key".to_owned()))
        );

        assert_eq!(parse_error("upstream timeout"), None);
    }
}
