//! Ollama `/api/chat` wire format types

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::types::FunctionParameters;

// -- Request types --

/// Ollama chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaRequest {
    /// Model name, optionally with a `:tag`
    pub model: String,
    /// Conversation messages
    pub messages: Vec<OllamaMessage>,
    /// Whether to stream NDJSON lines
    pub stream: bool,
    /// Output format constraint (`json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<OllamaTool>,
    /// Sampling options
    #[serde(default)]
    pub options: OllamaOptions,
}

/// Ollama message, used in both requests and responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaMessage {
    /// Role ("system", "user", "assistant", "tool")
    #[serde(default)]
    pub role: String,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Base64-encoded images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OllamaToolCall>,
    /// Name of the tool whose result this message carries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// Ollama tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaToolCall {
    /// Function call details
    pub function: OllamaFunctionCall,
}

/// Function call details within an Ollama tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunctionCall {
    /// Position of the call within the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Function name
    pub name: String,
    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Ollama tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaTool {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function specification
    pub function: OllamaFunction,
}

/// Ollama function specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunction {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: FunctionParameters,
}

/// Ollama sampling options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaOptions {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

// -- Response types --

/// One NDJSON line of a streamed chat, or the whole non-streamed response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaChatResponse {
    /// Model name
    #[serde(default)]
    pub model: String,
    /// Message fragment
    #[serde(default)]
    pub message: OllamaMessage,
    /// Whether this is the final line
    #[serde(default)]
    pub done: bool,
    /// Why generation ended (final line only)
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Prompt tokens (final line only)
    #[serde(default)]
    pub prompt_eval_count: u32,
    /// Generated tokens (final line only)
    #[serde(default)]
    pub eval_count: u32,
    /// Error reported mid-stream
    #[serde(default)]
    pub error: Option<String>,
}

/// Ollama done reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OllamaDoneReason {
    /// Natural stop
    Stop,
    /// Token limit reached
    Length,
}

// -- Error response --

/// Ollama error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaErrorResponse {
    /// Error message
    pub error: String,
}
