//! Conversion between canonical types and Google Gemini wire format

use indexmap::IndexMap;

use super::{arguments_object, arguments_string, is_valid_image};
use crate::error::LlmError;
use crate::protocol::google::{
    GoogleContent, GoogleFinishReason, GoogleFunctionCall, GoogleFunctionDeclaration, GoogleFunctionResponse,
    GoogleGenerationConfig, GoogleInlineData, GooglePart, GoogleRequest, GoogleResponse, GoogleSchema, GoogleTool,
    GoogleType, GoogleUsageMetadata,
};
use crate::stream::{
    StreamNormalizer, TextAccumulator, VendorFinishReason, canonical_finish_reason, reconcile_finish_reason,
};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ContentPart, FinishReason, FunctionParameters, PropertySchema,
    Role, ToolCall, Usage,
};

const PROVIDER: &str = "google";

/// Temperature sent when the request leaves it unset
///
/// Gemini treats an absent temperature as its model default. The smallest
/// positive subnormal `f32` keeps unset requests near-deterministic while
/// staying distinguishable from an explicit zero.
pub const UNSET_TEMPERATURE: f32 = f32::from_bits(1);

impl VendorFinishReason for GoogleFinishReason {
    fn canonical(&self) -> Option<FinishReason> {
        match self {
            Self::FinishReasonUnspecified => None,
            Self::Stop | Self::Safety | Self::Recitation | Self::Blocklist | Self::ProhibitedContent | Self::Spii => {
                Some(FinishReason::Stop)
            }
            Self::MaxTokens => Some(FinishReason::MaxTokens),
        }
    }
}

impl From<GoogleUsageMetadata> for Usage {
    fn from(usage: GoogleUsageMetadata) -> Self {
        Self {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }
    }
}

// -- Request translation --

impl TryFrom<&ChatCompletionRequest> for GoogleRequest {
    type Error = LlmError;

    fn try_from(req: &ChatCompletionRequest) -> Result<Self, Self::Error> {
        let contents = req
            .messages
            .iter()
            .map(|message| {
                let (role, parts) = match message.role {
                    Role::User => ("user", content_parts(&message.content)),
                    Role::Assistant => {
                        let mut parts = content_parts(&message.content);
                        for call in &message.tool_calls {
                            parts.push(GooglePart {
                                function_call: Some(GoogleFunctionCall {
                                    id: None,
                                    name: call.function.name.clone(),
                                    args: arguments_object(call)?,
                                }),
                                ..GooglePart::default()
                            });
                        }
                        ("model", parts)
                    }
                    Role::Tool => (
                        "user",
                        message
                            .tool_results
                            .iter()
                            .map(|r| GooglePart {
                                function_response: Some(GoogleFunctionResponse {
                                    name: r.function_name.clone(),
                                    response: serde_json::json!({
                                        "name": r.function_name,
                                        "content": r.result,
                                    }),
                                }),
                                ..GooglePart::default()
                            })
                            .collect(),
                    ),
                };

                Ok(GoogleContent {
                    role: Some(role.to_owned()),
                    parts,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        let tools = if req.tools.is_empty() {
            Vec::new()
        } else {
            vec![GoogleTool {
                function_declarations: req
                    .tools
                    .iter()
                    .map(|t| GoogleFunctionDeclaration {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: parameters_schema(&t.function.parameters),
                    })
                    .collect(),
            }]
        };

        Ok(Self {
            contents,
            system_instruction: req.system_prompt.as_ref().map(|system| GoogleContent {
                role: None,
                parts: vec![GooglePart::text(system.clone())],
            }),
            generation_config: GoogleGenerationConfig {
                temperature: Some(req.temperature.unwrap_or(UNSET_TEMPERATURE)),
                top_p: req.top_p,
                max_output_tokens: req.max_tokens,
                response_mime_type: req.json_mode.then(|| "application/json".to_owned()),
            },
            tools,
        })
    }
}

fn content_parts(parts: &[ContentPart]) -> Vec<GooglePart> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } if text.is_empty() => None,
            ContentPart::Text { text } => Some(GooglePart::text(text.clone())),
            ContentPart::Image { data, media_type } => is_valid_image(PROVIDER, data, media_type).then(|| GooglePart {
                inline_data: Some(GoogleInlineData {
                    mime_type: media_type.clone(),
                    data: data.clone(),
                }),
                ..GooglePart::default()
            }),
        })
        .collect()
}

/// Map a JSON-Schema type name onto Gemini's type token
fn google_type(kind: &str) -> GoogleType {
    match kind {
        "object" => GoogleType::Object,
        "string" => GoogleType::String,
        "number" => GoogleType::Number,
        "integer" => GoogleType::Integer,
        "boolean" => GoogleType::Boolean,
        "array" => GoogleType::Array,
        _ => GoogleType::TypeUnspecified,
    }
}

fn parameters_schema(params: &FunctionParameters) -> GoogleSchema {
    GoogleSchema {
        kind: google_type(&params.kind),
        description: None,
        properties: params
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), property_schema(prop)))
            .collect(),
        required: params.required.clone(),
        enum_values: Vec::new(),
        items: None,
    }
}

fn property_schema(prop: &PropertySchema) -> GoogleSchema {
    GoogleSchema {
        kind: google_type(&prop.kind),
        description: prop.description.clone(),
        properties: IndexMap::new(),
        required: Vec::new(),
        enum_values: prop.enum_values.clone(),
        items: prop.items.as_deref().map(|items| Box::new(property_schema(items))),
    }
}

// -- Non-streaming response --

impl TryFrom<GoogleResponse> for ChatCompletionResponse {
    type Error = LlmError;

    /// A unary response has the same shape as a single stream chunk
    fn try_from(resp: GoogleResponse) -> Result<Self, Self::Error> {
        let mut normalizer = GoogleStreamNormalizer::new(resp.model_version.clone().unwrap_or_default());
        match normalizer.normalize(resp)? {
            Some(response) => Ok(response),
            None => Ok(normalizer.without_choices()),
        }
    }
}

// -- Stream normalization --

/// Normalizes Gemini `streamGenerateContent` chunks
///
/// Function calls arrive whole, so each one is emitted in the delta of the
/// chunk that carries it. Calls without a vendor id get `call_{n}_{name}`.
#[derive(Debug)]
pub struct GoogleStreamNormalizer {
    model: String,
    id: String,
    usage: Usage,
    text: TextAccumulator,
    tool_calls: u32,
}

impl GoogleStreamNormalizer {
    /// Create a normalizer reporting `model` until the vendor names one
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: String::new(),
            usage: Usage::default(),
            text: TextAccumulator::new(),
            tool_calls: 0,
        }
    }

    fn without_choices(&self) -> ChatCompletionResponse {
        ChatCompletionResponse::default()
            .with_ids(self.id.clone(), self.model.clone())
            .with_usage(self.usage)
    }
}

impl StreamNormalizer for GoogleStreamNormalizer {
    type Event = GoogleResponse;

    fn normalize(&mut self, chunk: GoogleResponse) -> Result<Option<ChatCompletionResponse>, LlmError> {
        if let Some(usage) = chunk.usage_metadata {
            self.usage = usage.into();
        }
        if let Some(model) = chunk.model_version {
            self.model = model;
        }
        if let Some(id) = chunk.response_id {
            self.id = id;
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            // a blocked prompt gets no candidates and ends the turn
            let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) else {
                return Ok(None);
            };
            tracing::warn!(provider = PROVIDER, model = %self.model, block_reason = %reason, "prompt blocked");
            return Ok(Some(
                ChatCompletionResponse::single(String::new(), Vec::new(), Some(FinishReason::Stop))
                    .with_ids(self.id.clone(), self.model.clone())
                    .with_usage(self.usage),
            ));
        };

        let mut text = String::new();
        let mut calls = Vec::new();
        for part in candidate.content.parts {
            if part.thought {
                continue;
            }
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}_{}", self.tool_calls, call.name));
                calls.push(ToolCall::new(id, call.name, arguments_string(&call.args)));
                self.tool_calls += 1;
            }
        }

        let finish = match candidate.finish_reason.as_deref() {
            Some(value) => canonical_finish_reason::<GoogleFinishReason>(PROVIDER, value)?,
            None => None,
        };
        let finish = reconcile_finish_reason(finish, self.tool_calls > 0);

        let text = self.text.push(&text);
        Ok(Some(
            ChatCompletionResponse::single(text, calls, finish)
                .with_ids(self.id.clone(), self.model.clone())
                .with_usage(self.usage),
        ))
    }

    fn finish(&mut self) -> Result<Option<ChatCompletionResponse>, LlmError> {
        Ok(None)
    }
}
