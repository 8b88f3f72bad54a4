use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Configuration for a single LLM provider, tagged by protocol
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// `OpenAI` or an OpenAI-compatible server
    Openai(OpenAiConfig),
    /// Azure-hosted `OpenAI` deployments
    AzureOpenai(AzureOpenAiConfig),
    /// Anthropic Messages API
    Anthropic(AnthropicConfig),
    /// Claude served through Google Vertex AI
    VertexAnthropic(VertexAnthropicConfig),
    /// Google Gemini (Generative Language API)
    Google(GoogleConfig),
    /// Local Ollama server
    Ollama(OllamaConfig),
}

impl ProviderConfig {
    /// Protocol name used in logs and error messages
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Openai(_) => "openai",
            Self::AzureOpenai(_) => "azure_openai",
            Self::Anthropic(_) => "anthropic",
            Self::VertexAnthropic(_) => "vertex_anthropic",
            Self::Google(_) => "google",
            Self::Ollama(_) => "ollama",
        }
    }

    /// Models accepted in addition to the provider's built-in list
    pub fn extra_models(&self) -> &[String] {
        match self {
            Self::Openai(c) => &c.extra_models,
            Self::AzureOpenai(c) => &c.extra_models,
            Self::Anthropic(c) => &c.extra_models,
            Self::VertexAnthropic(c) => &c.extra_models,
            Self::Google(c) => &c.extra_models,
            Self::Ollama(c) => &c.extra_models,
        }
    }
}

/// `OpenAI` provider settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token
    pub api_key: SecretString,
    /// Base URL override for compatible servers
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Additional accepted model names
    #[serde(default)]
    pub extra_models: Vec<String>,
}

/// Azure `OpenAI` provider settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureOpenAiConfig {
    /// API key sent in the `api-key` header
    pub api_key: SecretString,
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: Url,
    /// REST API version query parameter
    #[serde(default = "default_azure_api_version")]
    pub api_version: String,
    /// Additional accepted model (deployment) names
    #[serde(default)]
    pub extra_models: Vec<String>,
}

fn default_azure_api_version() -> String {
    "2023-05-15".to_owned()
}

/// Anthropic provider settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// API key sent in the `x-api-key` header
    pub api_key: SecretString,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Beta feature flags sent in the `anthropic-beta` header
    #[serde(default)]
    pub betas: Vec<String>,
    /// Additional accepted model names
    #[serde(default)]
    pub extra_models: Vec<String>,
}

/// Claude-on-Vertex provider settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VertexAnthropicConfig {
    /// Path to a service account JSON key file
    pub credentials_file: PathBuf,
    /// Google Cloud project ID
    pub project_id: String,
    /// Vertex region, e.g. `us-east5`
    pub location: String,
    /// Endpoint override, defaults to the regional `aiplatform` host
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Beta feature flags sent in the `anthropic-beta` header
    #[serde(default)]
    pub betas: Vec<String>,
    /// Additional accepted model names
    #[serde(default)]
    pub extra_models: Vec<String>,
}

/// Google Gemini provider settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleConfig {
    /// API key sent as the `key` query parameter
    pub api_key: SecretString,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Additional accepted model names
    #[serde(default)]
    pub extra_models: Vec<String>,
}

/// Ollama provider settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OllamaConfig {
    /// Server URL
    #[serde(default = "default_ollama_host")]
    pub host: Url,
    /// Additional accepted model families (the part before `:tag`)
    #[serde(default)]
    pub extra_models: Vec<String>,
}

fn default_ollama_host() -> Url {
    Url::parse("http://localhost:11434").expect("valid default URL")
}
