//! Conversion between canonical types and `OpenAI` wire format

use super::is_valid_image;
use crate::error::{LlmError, ProtocolError};
use crate::protocol::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFinishReason, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl,
    OpenAiMessage, OpenAiRequest, OpenAiResponse, OpenAiResponseFormat, OpenAiStreamChunk, OpenAiTool, OpenAiToolCall,
};
use crate::stream::{
    StreamNormalizer, TextAccumulator, ToolCallAssembler, ToolCallFragment, VendorFinishReason,
    canonical_finish_reason, reconcile_finish_reason,
};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ContentPart, FinishReason, InputMessage, Role, ToolCall, Usage,
};

const PROVIDER: &str = "openai";

/// Models that get `reasoning_effort = "high"`
const HIGH_EFFORT_MODELS: &[&str] = &["o3-mini"];

impl VendorFinishReason for OpenAiFinishReason {
    fn canonical(&self) -> Option<FinishReason> {
        match self {
            Self::Stop | Self::ContentFilter => Some(FinishReason::Stop),
            Self::Length => Some(FinishReason::MaxTokens),
            Self::ToolCalls | Self::FunctionCall => Some(FinishReason::ToolCalls),
            Self::Null => None,
        }
    }
}

fn finish_reason(value: Option<&str>) -> Result<Option<FinishReason>, ProtocolError> {
    match value {
        None | Some("") => Ok(None),
        Some(value) => canonical_finish_reason::<OpenAiFinishReason>(PROVIDER, value),
    }
}

// -- Request translation --

impl From<&ChatCompletionRequest> for OpenAiRequest {
    fn from(req: &ChatCompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        if let Some(system) = &req.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_owned(),
                content: Some(OpenAiContent::Text(system.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        for message in &req.messages {
            push_message(&mut messages, message);
        }

        Self {
            model: req.model.clone(),
            messages,
            temperature: req.temperature,
            top_p: req.top_p,
            max_completion_tokens: req.max_tokens,
            n: 1,
            stream: None,
            tools: req
                .tools
                .iter()
                .map(|t| OpenAiTool {
                    tool_type: "function".to_owned(),
                    function: OpenAiFunction {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    },
                })
                .collect(),
            response_format: req.json_mode.then(|| OpenAiResponseFormat {
                format_type: "json_object".to_owned(),
            }),
            reasoning_effort: HIGH_EFFORT_MODELS
                .contains(&req.model.as_str())
                .then(|| "high".to_owned()),
        }
    }
}

fn push_message(messages: &mut Vec<OpenAiMessage>, message: &InputMessage) {
    match message.role {
        Role::User => messages.push(OpenAiMessage {
            role: "user".to_owned(),
            content: Some(user_content(&message.content)),
            tool_calls: None,
            tool_call_id: None,
        }),
        Role::Assistant => {
            let text = message.text();
            let tool_calls: Vec<OpenAiToolCall> = message
                .tool_calls
                .iter()
                .map(|tc| OpenAiToolCall {
                    id: tc.id.clone(),
                    tool_type: "function".to_owned(),
                    function: OpenAiFunctionCall {
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    },
                })
                .collect();

            messages.push(OpenAiMessage {
                role: "assistant".to_owned(),
                content: (!text.is_empty()).then_some(OpenAiContent::Text(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            });
        }
        Role::Tool => {
            for result in &message.tool_results {
                messages.push(OpenAiMessage {
                    role: "tool".to_owned(),
                    content: Some(OpenAiContent::Text(result.result.clone())),
                    tool_calls: None,
                    tool_call_id: Some(result.tool_call_id.clone()),
                });
            }
        }
    }
}

/// Plain text when the message has no images, content parts otherwise
fn user_content(parts: &[ContentPart]) -> OpenAiContent {
    if parts.iter().all(|p| matches!(p, ContentPart::Text { .. })) {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect();
        return OpenAiContent::Text(text);
    }

    OpenAiContent::Parts(
        parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(OpenAiContentPart::Text { text: text.clone() }),
                ContentPart::Image { data, media_type } => {
                    is_valid_image(PROVIDER, data, media_type).then(|| OpenAiContentPart::ImageUrl {
                        image_url: OpenAiImageUrl {
                            url: format!("data:{media_type};base64,{data}"),
                            detail: Some("high".to_owned()),
                        },
                    })
                }
            })
            .collect(),
    )
}

// -- Non-streaming response --

impl TryFrom<OpenAiResponse> for ChatCompletionResponse {
    type Error = LlmError;

    fn try_from(resp: OpenAiResponse) -> Result<Self, Self::Error> {
        let Some(choice) = resp.choices.into_iter().next() else {
            return Err(ProtocolError::MalformedEvent {
                provider: PROVIDER,
                detail: "response contains no choices".to_owned(),
            }
            .into());
        };

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        let finish = reconcile_finish_reason(
            finish_reason(choice.finish_reason.as_deref())?,
            !tool_calls.is_empty(),
        );
        let usage = resp
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(
            Self::single(choice.message.content.unwrap_or_default(), tool_calls, finish)
                .with_ids(resp.id, resp.model)
                .with_usage(usage),
        )
    }
}

// -- Stream normalization --

/// Normalizes `OpenAI` chat completion chunks
///
/// Every chunk with a choice yields one delta, even when it carries no new
/// text. Tool call arguments are reassembled from fragments.
#[derive(Debug)]
pub struct OpenAiStreamNormalizer {
    text: TextAccumulator,
    tool_calls: ToolCallAssembler,
}

impl OpenAiStreamNormalizer {
    /// Create a normalizer for one streamed turn
    pub fn new() -> Self {
        Self {
            text: TextAccumulator::new(),
            tool_calls: ToolCallAssembler::new(PROVIDER),
        }
    }
}

impl Default for OpenAiStreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamNormalizer for OpenAiStreamNormalizer {
    type Event = OpenAiStreamChunk;

    fn normalize(&mut self, chunk: OpenAiStreamChunk) -> Result<Option<ChatCompletionResponse>, LlmError> {
        // usage-only chunks carry no choice
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };

        let text = self.text.push(choice.delta.content.as_deref().unwrap_or_default());

        let mut completed = Vec::new();
        for fragment in choice.delta.tool_calls {
            let (name, arguments) = fragment
                .function
                .map(|f| (f.name, f.arguments.unwrap_or_default()))
                .unwrap_or_default();

            let fragment = ToolCallFragment {
                index: fragment.index,
                id: fragment.id,
                name,
                arguments,
            };
            if let Some(call) = self.tool_calls.push(fragment)? {
                completed.push(call);
            }
        }

        let finish = finish_reason(choice.finish_reason.as_deref())?;
        if finish.is_some() {
            self.tool_calls.finish()?;
        }
        let finish = reconcile_finish_reason(finish, self.tool_calls.completed() > 0);

        Ok(Some(
            ChatCompletionResponse::single(text, completed, finish).with_ids(chunk.id, chunk.model),
        ))
    }

    fn finish(&mut self) -> Result<Option<ChatCompletionResponse>, LlmError> {
        self.tool_calls.finish()?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::types::{FunctionParameters, PropertySchema, Tool, ToolResult};

    fn chunk(json: serde_json::Value) -> OpenAiStreamChunk {
        serde_json::from_value(json).unwrap()
    }

    fn weather_tool() -> Tool {
        let mut properties = IndexMap::new();
        properties.insert("location".to_owned(), PropertySchema::new("string", "City"));
        Tool::function(
            "get_weather",
            "Current weather",
            FunctionParameters::object(properties, vec!["location".to_owned()]),
        )
    }

    #[test]
    fn request_places_system_prompt_first() {
        let mut req = ChatCompletionRequest::new("gpt-4o", vec![InputMessage::user("hi")]);
        req.system_prompt = Some("be brief".to_owned());

        let body = serde_json::to_value(OpenAiRequest::from(&req)).unwrap();
        assert_eq!(body["messages"][0], serde_json::json!({"role": "system", "content": "be brief"}));
        assert_eq!(body["messages"][1], serde_json::json!({"role": "user", "content": "hi"}));
        assert_eq!(body["n"], 1);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn request_options() {
        let mut req = ChatCompletionRequest::new("o3-mini", vec![InputMessage::user("hi")]);
        req.json_mode = true;
        req.max_tokens = Some(256);
        req.tools = vec![weather_tool()];

        let body = serde_json::to_value(OpenAiRequest::from(&req)).unwrap();
        assert_eq!(body["reasoning_effort"], "high");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_completion_tokens"], 256);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"][0], "location");
    }

    #[test]
    fn images_become_data_uris() {
        let req = ChatCompletionRequest::new(
            "gpt-4o",
            vec![InputMessage::user_parts(vec![
                ContentPart::text("what is this?"),
                ContentPart::image("aGVsbG8=", "image/png"),
                ContentPart::image("%%%", "image/png"),
            ])],
        );

        let body = serde_json::to_value(OpenAiRequest::from(&req)).unwrap();
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,aGVsbG8=");
        assert_eq!(parts[1]["image_url"]["detail"], "high");
    }

    #[test]
    fn tool_turns_round_trip_ids() {
        let req = ChatCompletionRequest::new(
            "gpt-4o",
            vec![
                InputMessage::user("weather?"),
                InputMessage::assistant_tool_calls(vec![ToolCall::new("call_1", "get_weather", "{}")]),
                InputMessage::tool_results(vec![ToolResult {
                    tool_call_id: "call_1".to_owned(),
                    function_name: "get_weather".to_owned(),
                    result: "sunny".to_owned(),
                    is_error: false,
                }]),
            ],
        );

        let body = serde_json::to_value(OpenAiRequest::from(&req)).unwrap();
        assert!(body["messages"][1].get("content").is_none());
        assert_eq!(body["messages"][1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(body["messages"][2]["role"], "tool");
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
    }

    #[test]
    fn response_with_tool_calls() {
        let resp: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}
                    }]
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();

        let response = ChatCompletionResponse::try_from(resp).unwrap();
        assert_eq!(response.content(), "");
        assert_eq!(response.tool_calls().len(), 1);
        assert_eq!(response.finish_reason(), Some(FinishReason::ToolCalls));
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn response_without_choices_is_malformed() {
        let resp: OpenAiResponse = serde_json::from_value(serde_json::json!({"id": "x", "choices": []})).unwrap();
        assert!(matches!(
            ChatCompletionResponse::try_from(resp),
            Err(LlmError::Protocol(ProtocolError::MalformedEvent { .. }))
        ));
    }

    #[test]
    fn finish_reason_table() {
        assert_eq!(finish_reason(Some("stop")).unwrap(), Some(FinishReason::Stop));
        assert_eq!(finish_reason(Some("content_filter")).unwrap(), Some(FinishReason::Stop));
        assert_eq!(finish_reason(Some("length")).unwrap(), Some(FinishReason::MaxTokens));
        assert_eq!(finish_reason(Some("function_call")).unwrap(), Some(FinishReason::ToolCalls));
        assert_eq!(finish_reason(Some("null")).unwrap(), None);
        assert_eq!(finish_reason(None).unwrap(), None);
        assert!(finish_reason(Some("exploded")).is_err());
    }

    #[test]
    fn stream_text_deltas() {
        let mut normalizer = OpenAiStreamNormalizer::new();

        let first = normalizer
            .normalize(chunk(serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"role": "assistant"}}]
            })))
            .unwrap()
            .unwrap();
        assert_eq!(first.content(), "");

        let second = normalizer
            .normalize(chunk(serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": "Hello"}}]
            })))
            .unwrap()
            .unwrap();
        assert_eq!(second.content(), "Hello");
        assert_eq!(second.id, "c1");

        let last = normalizer
            .normalize(chunk(serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            })))
            .unwrap()
            .unwrap();
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn stream_fragmented_tool_call() {
        let mut normalizer = OpenAiStreamNormalizer::new();

        let pieces = [
            serde_json::json!({"index": 0, "id": "call_1", "type": "function",
                "function": {"name": "get_weather", "arguments": ""}}),
            serde_json::json!({"index": 0, "function": {"arguments": "{\"location\""}}),
            serde_json::json!({"index": 0, "function": {"arguments": ": \"Paris\"}"}}),
        ];

        let mut calls = Vec::new();
        for piece in pieces {
            let delta = normalizer
                .normalize(chunk(serde_json::json!({
                    "id": "c1", "model": "gpt-4o",
                    "choices": [{"index": 0, "delta": {"tool_calls": [piece]}}]
                })))
                .unwrap()
                .unwrap();
            calls.extend(delta.tool_calls().iter().cloned());
        }

        assert_eq!(calls, vec![ToolCall::new("call_1", "get_weather", "{\"location\": \"Paris\"}")]);

        let last = normalizer
            .normalize(chunk(serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            })))
            .unwrap()
            .unwrap();
        assert_eq!(last.finish_reason(), Some(FinishReason::ToolCalls));
    }

    #[test]
    fn unfinished_tool_call_at_finish_is_an_error() {
        let mut normalizer = OpenAiStreamNormalizer::new();
        normalizer
            .normalize(chunk(serde_json::json!({
                "choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "id": "call_1", "function": {"name": "get_weather", "arguments": "{\"loc"}}
                ]}}]
            })))
            .unwrap();

        let err = normalizer
            .normalize(chunk(serde_json::json!({
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
            })))
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::Protocol(ProtocolError::IncompleteToolCall { .. })
        ));
    }

    #[test]
    fn unknown_stream_finish_reason_is_an_error() {
        let mut normalizer = OpenAiStreamNormalizer::new();
        let err = normalizer
            .normalize(chunk(serde_json::json!({
                "choices": [{"index": 0, "delta": {}, "finish_reason": "mystery"}]
            })))
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::Protocol(ProtocolError::UnknownFinishReason { provider: "openai", .. })
        ));
    }

    #[test]
    fn usage_only_chunk_is_skipped() {
        let mut normalizer = OpenAiStreamNormalizer::new();
        let delta = normalizer
            .normalize(chunk(serde_json::json!({
                "choices": [],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })))
            .unwrap();
        assert!(delta.is_none());
    }
}
