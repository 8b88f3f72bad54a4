//! Canonical types for LLM request/response representation
//!
//! These types are provider-agnostic: every vendor wire format is translated
//! to and from them, and every stream delta is expressed with them.

pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use message::{ContentPart, FunctionCall, InputMessage, Role, ToolCall, ToolResult};
pub use request::ChatCompletionRequest;
pub use response::{ChatCompletionResponse, Choice, FinishReason, OutputMessage, Usage};
pub use tool::{FunctionDefinition, FunctionParameters, PropertySchema, Tool};
