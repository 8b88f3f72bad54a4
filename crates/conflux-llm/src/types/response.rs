use serde::{Deserialize, Serialize};

use super::message::{Role, ToolCall};

/// Reason the model stopped generating
///
/// An unfinished turn is represented by `None` on the choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation, including safety stops
    Stop,
    /// Model decided to call a tool
    ToolCalls,
    /// Hit the token limit
    MaxTokens,
}

/// Token usage statistics, zero when the vendor reports nothing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated in the completion
    pub completion_tokens: u32,
    /// Total tokens (prompt + completion)
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage from prompt and completion counts
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Assistant message within a response choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    /// Role is always assistant for completions
    pub role: Role,
    /// Text content
    pub content: String,
    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl OutputMessage {
    /// Create an assistant message
    pub const fn new(content: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
        }
    }
}

/// A single completion choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice
    pub index: u32,
    /// Generated message
    pub message: OutputMessage,
    /// Why generation stopped, absent while the turn is still running
    pub finish_reason: Option<FinishReason>,
}

/// Canonical completion response
///
/// In a stream the same shape is a delta: `content` holds only the text
/// produced since the previous delta and `tool_calls` only the calls that
/// just became complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response identifier, empty when the vendor assigns none
    pub id: String,
    /// Model used for generation
    pub model: String,
    /// Generated choices
    pub choices: Vec<Choice>,
    /// Token usage statistics
    pub usage: Usage,
}

impl ChatCompletionResponse {
    /// Build a single-choice response or delta
    pub fn single(
        content: String,
        tool_calls: Vec<ToolCall>,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        Self {
            choices: vec![Choice {
                index: 0,
                message: OutputMessage::new(content, tool_calls),
                finish_reason,
            }],
            ..Self::default()
        }
    }

    /// Attach vendor identifiers
    #[must_use]
    pub fn with_ids(mut self, id: impl Into<String>, model: impl Into<String>) -> Self {
        self.id = id.into();
        self.model = model.into();
        self
    }

    /// Attach usage statistics
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// First choice, if any
    pub fn choice(&self) -> Option<&Choice> {
        self.choices.first()
    }

    /// Text of the first choice
    pub fn content(&self) -> &str {
        self.choice().map_or("", |c| c.message.content.as_str())
    }

    /// Tool calls of the first choice
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.choice().map_or(&[], |c| c.message.tool_calls.as_slice())
    }

    /// Finish reason of the first choice
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choice().and_then(|c| c.finish_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_sum() {
        assert_eq!(Usage::new(12, 30).total_tokens, 42);
    }

    #[test]
    fn finish_reason_wire_names() {
        assert_eq!(serde_json::to_value(FinishReason::MaxTokens).unwrap(), "max_tokens");
        assert_eq!(serde_json::to_value(FinishReason::ToolCalls).unwrap(), "tool_calls");
    }

    #[test]
    fn accessors_on_empty_response() {
        let response = ChatCompletionResponse::default();
        assert_eq!(response.content(), "");
        assert!(response.tool_calls().is_empty());
        assert_eq!(response.finish_reason(), None);
    }
}
