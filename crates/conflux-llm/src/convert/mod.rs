//! Conversion between canonical types and vendor wire formats
//!
//! Each submodule translates requests for one protocol, builds non-streaming
//! responses, and provides the protocol's stream normalizer.

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::LlmError;
use crate::types::ToolCall;

/// Check that an image part carries decodable base64, logging the skip if not
pub(crate) fn is_valid_image(provider: &'static str, data: &str, media_type: &str) -> bool {
    match STANDARD.decode(data) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(provider, media_type, error = %e, "skipping image with invalid base64 data");
            false
        }
    }
}

/// Parse a tool call's arguments into the JSON object vendors expect
///
/// Empty arguments are sent as `{}`.
pub(crate) fn arguments_object(call: &ToolCall) -> Result<serde_json::Value, LlmError> {
    let arguments = call.function.arguments.trim();
    if arguments.is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    serde_json::from_str(arguments).map_err(|e| {
        LlmError::InvalidRequest(format!(
            "tool call '{}' ({}) has invalid arguments JSON: {e}",
            call.function.name, call.id
        ))
    })
}

/// Render vendor-native arguments as the canonical JSON string
pub(crate) fn arguments_string(args: &serde_json::Value) -> String {
    if args.is_null() {
        "{}".to_owned()
    } else {
        args.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_validation() {
        assert!(is_valid_image("test", "aGVsbG8=", "image/png"));
        assert!(!is_valid_image("test", "not base64!", "image/png"));
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let call = ToolCall::new("call_1", "list_files", "");
        assert_eq!(arguments_object(&call).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let call = ToolCall::new("call_1", "get_weather", "{\"location\"");
        let err = arguments_object(&call).unwrap_err();
        assert!(err.to_string().contains("get_weather"));
    }

    #[test]
    fn null_arguments_render_as_empty_object() {
        assert_eq!(arguments_string(&serde_json::Value::Null), "{}");
        assert_eq!(
            arguments_string(&serde_json::json!({"location": "Paris"})),
            r#"{"location":"Paris"}"#
        );
    }
}
