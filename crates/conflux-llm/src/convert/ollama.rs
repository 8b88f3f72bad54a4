//! Conversion between canonical types and Ollama chat format

use super::{arguments_object, arguments_string, is_valid_image};
use crate::error::LlmError;
use crate::protocol::ollama::{
    OllamaChatResponse, OllamaDoneReason, OllamaFunction, OllamaFunctionCall, OllamaMessage, OllamaOptions,
    OllamaRequest, OllamaTool, OllamaToolCall,
};
use crate::stream::{
    StreamNormalizer, TextAccumulator, VendorFinishReason, canonical_finish_reason, reconcile_finish_reason,
};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ContentPart, FinishReason, Role, ToolCall, Usage};

const PROVIDER: &str = "ollama";

impl VendorFinishReason for OllamaDoneReason {
    fn canonical(&self) -> Option<FinishReason> {
        match self {
            Self::Stop => Some(FinishReason::Stop),
            Self::Length => Some(FinishReason::MaxTokens),
        }
    }
}

// -- Request translation --

impl TryFrom<&ChatCompletionRequest> for OllamaRequest {
    type Error = LlmError;

    fn try_from(req: &ChatCompletionRequest) -> Result<Self, Self::Error> {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        if let Some(system) = &req.system_prompt {
            messages.push(OllamaMessage {
                role: "system".to_owned(),
                content: system.clone(),
                ..OllamaMessage::default()
            });
        }

        for message in &req.messages {
            match message.role {
                Role::User => messages.push(OllamaMessage {
                    role: "user".to_owned(),
                    content: message.text(),
                    images: images(&message.content),
                    ..OllamaMessage::default()
                }),
                Role::Assistant => messages.push(OllamaMessage {
                    role: "assistant".to_owned(),
                    content: message.text(),
                    tool_calls: message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            Ok(OllamaToolCall {
                                function: OllamaFunctionCall {
                                    index: None,
                                    name: call.function.name.clone(),
                                    arguments: arguments_object(call)?,
                                },
                            })
                        })
                        .collect::<Result<_, LlmError>>()?,
                    ..OllamaMessage::default()
                }),
                Role::Tool => messages.extend(message.tool_results.iter().map(|r| OllamaMessage {
                    role: "tool".to_owned(),
                    content: r.result.clone(),
                    tool_name: Some(r.function_name.clone()),
                    ..OllamaMessage::default()
                })),
            }
        }

        Ok(Self {
            model: req.model.clone(),
            messages,
            stream: false,
            format: req.json_mode.then(|| "json".to_owned()),
            tools: req
                .tools
                .iter()
                .map(|t| OllamaTool {
                    tool_type: "function".to_owned(),
                    function: OllamaFunction {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    },
                })
                .collect(),
            options: OllamaOptions {
                temperature: req.temperature,
                top_p: req.top_p,
                num_predict: req.max_tokens,
            },
        })
    }
}

/// Raw base64 payloads of the decodable images in a message
fn images(parts: &[ContentPart]) -> Vec<String> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Image { data, media_type } if is_valid_image(PROVIDER, data, media_type) => Some(data.clone()),
            _ => None,
        })
        .collect()
}

// -- Non-streaming response --

impl TryFrom<OllamaChatResponse> for ChatCompletionResponse {
    type Error = LlmError;

    fn try_from(resp: OllamaChatResponse) -> Result<Self, Self::Error> {
        let model = resp.model.clone();
        Ok(OllamaStreamNormalizer::new(model).normalize(resp)?.unwrap_or_default())
    }
}

// -- Stream normalization --

/// Normalizes Ollama NDJSON chat lines
///
/// Each line yields one delta. Tool calls arrive whole; Ollama assigns no
/// ids, so calls are numbered `call_{n}` in order of arrival.
#[derive(Debug)]
pub struct OllamaStreamNormalizer {
    model: String,
    text: TextAccumulator,
    tool_calls: u32,
}

impl OllamaStreamNormalizer {
    /// Create a normalizer for one streamed turn
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            text: TextAccumulator::new(),
            tool_calls: 0,
        }
    }
}

impl StreamNormalizer for OllamaStreamNormalizer {
    type Event = OllamaChatResponse;

    fn normalize(&mut self, line: OllamaChatResponse) -> Result<Option<ChatCompletionResponse>, LlmError> {
        if let Some(message) = line.error {
            return Err(LlmError::Api {
                provider: PROVIDER.to_owned(),
                status: None,
                code: None,
                message,
            });
        }
        if !line.model.is_empty() {
            self.model = line.model;
        }

        let calls: Vec<ToolCall> = line
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let id = format!("call_{}", self.tool_calls);
                self.tool_calls += 1;
                ToolCall::new(id, call.function.name, arguments_string(&call.function.arguments))
            })
            .collect();

        let text = self.text.push(&line.message.content);

        if !line.done {
            return Ok(Some(
                ChatCompletionResponse::single(text, calls, None).with_ids(String::new(), self.model.clone()),
            ));
        }

        let finish = match line.done_reason.as_deref() {
            None | Some("") => Some(FinishReason::Stop),
            Some(value) => canonical_finish_reason::<OllamaDoneReason>(PROVIDER, value)?,
        };
        let finish = reconcile_finish_reason(finish, self.tool_calls > 0);

        Ok(Some(
            ChatCompletionResponse::single(text, calls, finish)
                .with_ids(String::new(), self.model.clone())
                .with_usage(Usage::new(line.prompt_eval_count, line.eval_count)),
        ))
    }

    fn finish(&mut self) -> Result<Option<ChatCompletionResponse>, LlmError> {
        Ok(None)
    }
}
