//! Unified chat completion interface for Conflux
//!
//! Provides one request/response model over `OpenAI` (and Azure), Anthropic
//! (and Claude on Vertex AI), Google Gemini and Ollama, with every vendor
//! stream normalized into the same incremental delta protocol.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod consumer;
pub mod convert;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod stream;
pub mod types;

pub use consumer::{Completion, StreamHandler, drain, pump, stream_chat_completion};
pub use error::{ErrorKind, LlmError, ProtocolError};
pub use provider::{ModelAllowList, Provider, build_provider};
pub use stream::{ChatCompletionStream, StreamCloser};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, ContentPart, FinishReason, FunctionParameters,
    InputMessage, OutputMessage, PropertySchema, Role, Tool, ToolCall, ToolResult, Usage,
};
