//! Conversion between canonical types and Anthropic Messages API format

use super::{arguments_object, arguments_string, is_valid_image};
use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicImageSource, AnthropicMessage, AnthropicRequest, AnthropicResponse,
    AnthropicResponseBlock, AnthropicStopReason, AnthropicStreamContentBlock, AnthropicStreamDelta,
    AnthropicStreamEvent, AnthropicTool, AnthropicToolChoice, AnthropicUsage,
};
use crate::stream::{
    StreamNormalizer, TextAccumulator, ToolCallAssembler, ToolCallFragment, VendorFinishReason,
    canonical_finish_reason, reconcile_finish_reason,
};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ContentPart, FinishReason, Role, ToolCall, Usage};

const PROVIDER: &str = "anthropic";

/// Default `max_tokens` when the request does not set one (required by Anthropic)
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

impl VendorFinishReason for AnthropicStopReason {
    fn canonical(&self) -> Option<FinishReason> {
        match self {
            Self::EndTurn | Self::StopSequence | Self::Refusal => Some(FinishReason::Stop),
            Self::MaxTokens => Some(FinishReason::MaxTokens),
            Self::ToolUse => Some(FinishReason::ToolCalls),
        }
    }
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Self::new(usage.input_tokens, usage.output_tokens)
    }
}

// -- Request translation --

impl TryFrom<&ChatCompletionRequest> for AnthropicRequest {
    type Error = LlmError;

    fn try_from(req: &ChatCompletionRequest) -> Result<Self, Self::Error> {
        if req.json_mode {
            tracing::debug!(model = %req.model, "anthropic has no JSON mode, ignoring");
        }

        let messages = req
            .messages
            .iter()
            .map(|message| {
                let (role, content) = match message.role {
                    Role::User => ("user", content_blocks(&message.content)),
                    Role::Assistant => {
                        let mut blocks = content_blocks(&message.content);
                        for call in &message.tool_calls {
                            blocks.push(AnthropicContentBlock::ToolUse {
                                id: call.id.clone(),
                                name: call.function.name.clone(),
                                input: arguments_object(call)?,
                            });
                        }
                        ("assistant", blocks)
                    }
                    // tool results travel as user content
                    Role::Tool => (
                        "user",
                        message
                            .tool_results
                            .iter()
                            .map(|r| AnthropicContentBlock::ToolResult {
                                tool_use_id: r.tool_call_id.clone(),
                                content: r.result.clone(),
                                is_error: r.is_error,
                            })
                            .collect(),
                    ),
                };

                Ok(AnthropicMessage {
                    role: role.to_owned(),
                    content,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        let tools: Vec<AnthropicTool> = req
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect();

        Ok(Self {
            model: Some(req.model.clone()),
            anthropic_version: None,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: req.system_prompt.clone(),
            messages,
            temperature: req.temperature,
            top_p: req.top_p,
            stream: None,
            tool_choice: (!tools.is_empty()).then(|| AnthropicToolChoice {
                choice_type: "auto".to_owned(),
            }),
            tools,
        })
    }
}

fn content_blocks(parts: &[ContentPart]) -> Vec<AnthropicContentBlock> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } if text.is_empty() => None,
            ContentPart::Text { text } => Some(AnthropicContentBlock::Text { text: text.clone() }),
            ContentPart::Image { data, media_type } => {
                is_valid_image(PROVIDER, data, media_type).then(|| AnthropicContentBlock::Image {
                    source: AnthropicImageSource {
                        source_type: "base64".to_owned(),
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                })
            }
        })
        .collect()
}

// -- Non-streaming response --

impl TryFrom<AnthropicResponse> for ChatCompletionResponse {
    type Error = LlmError;

    fn try_from(resp: AnthropicResponse) -> Result<Self, Self::Error> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                AnthropicResponseBlock::Text { text } => content.push_str(&text),
                AnthropicResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, arguments_string(&input)));
                }
                AnthropicResponseBlock::Other => {}
            }
        }

        let finish = match resp.stop_reason.as_deref() {
            Some(value) => canonical_finish_reason::<AnthropicStopReason>(PROVIDER, value)?,
            None => None,
        };
        let finish = reconcile_finish_reason(finish, !tool_calls.is_empty());

        Ok(Self::single(content, tool_calls, finish)
            .with_ids(resp.id, resp.model)
            .with_usage(resp.usage.into()))
    }
}

// -- Stream normalization --

/// Normalizes Anthropic SSE events
///
/// Text deltas become content deltas. Tool input arrives as `input_json_delta`
/// fragments and is reassembled; a block stop closes a tool call whose input
/// was never streamed as `{}`. The turn ends on the `message_delta` that
/// carries the stop reason.
#[derive(Debug)]
pub struct AnthropicStreamNormalizer {
    id: String,
    model: String,
    usage: AnthropicUsage,
    text: TextAccumulator,
    tool_calls: ToolCallAssembler,
}

impl AnthropicStreamNormalizer {
    /// Create a normalizer for one streamed turn
    pub fn new() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            usage: AnthropicUsage::default(),
            text: TextAccumulator::new(),
            tool_calls: ToolCallAssembler::new(PROVIDER),
        }
    }

    fn delta(&self, text: String, tool_calls: Vec<ToolCall>, finish: Option<FinishReason>) -> ChatCompletionResponse {
        ChatCompletionResponse::single(text, tool_calls, finish).with_ids(self.id.clone(), self.model.clone())
    }

    fn push_fragment(&mut self, fragment: ToolCallFragment) -> Result<Option<ChatCompletionResponse>, LlmError> {
        Ok(self
            .tool_calls
            .push(fragment)?
            .map(|call| self.delta(String::new(), vec![call], None)))
    }
}

impl Default for AnthropicStreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamNormalizer for AnthropicStreamNormalizer {
    type Event = AnthropicStreamEvent;

    fn normalize(&mut self, event: AnthropicStreamEvent) -> Result<Option<ChatCompletionResponse>, LlmError> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                if let Some(usage) = message.usage {
                    self.usage = usage;
                }
                Ok(None)
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicStreamContentBlock::Text { text } if text.is_empty() => Ok(None),
                AnthropicStreamContentBlock::Text { text } => {
                    let text = self.text.push(&text);
                    Ok(Some(self.delta(text, Vec::new(), None)))
                }
                AnthropicStreamContentBlock::ToolUse { id, name } => self.push_fragment(ToolCallFragment {
                    index: Some(index),
                    id: Some(id),
                    name: Some(name),
                    arguments: String::new(),
                }),
                AnthropicStreamContentBlock::Other => Ok(None),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => {
                    let text = self.text.push(&text);
                    Ok(Some(self.delta(text, Vec::new(), None)))
                }
                AnthropicStreamDelta::InputJsonDelta { partial_json } => self.push_fragment(ToolCallFragment {
                    index: Some(index),
                    arguments: partial_json,
                    ..ToolCallFragment::default()
                }),
                AnthropicStreamDelta::Other => Ok(None),
            },
            AnthropicStreamEvent::ContentBlockStop { .. } => Ok(self
                .tool_calls
                .close_current()?
                .map(|call| self.delta(String::new(), vec![call], None))),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }

                let Some(stop_reason) = delta.stop_reason else {
                    return Ok(None);
                };
                let finish = canonical_finish_reason::<AnthropicStopReason>(PROVIDER, &stop_reason)?;
                self.tool_calls.finish()?;
                let finish = reconcile_finish_reason(finish, self.tool_calls.completed() > 0);

                Ok(Some(self.delta(String::new(), Vec::new(), finish).with_usage(self.usage.into())))
            }
            AnthropicStreamEvent::Error { error } => Err(LlmError::Api {
                provider: PROVIDER.to_owned(),
                status: None,
                code: Some(error.error_type),
                message: error.message,
            }),
            AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping | AnthropicStreamEvent::Unknown => Ok(None),
        }
    }

    fn finish(&mut self) -> Result<Option<ChatCompletionResponse>, LlmError> {
        self.tool_calls.finish()?;
        Ok(None)
    }
}
