mod harness;

use axum::http::StatusCode;
use conflux_llm::{
    ChatCompletionRequest, FinishReason, FunctionParameters, InputMessage, LlmError, OutputMessage, PropertySchema,
    StreamHandler, Tool, ToolCall, stream_chat_completion,
};
use harness::mock_vendor::{Canned, MockVendor};
use indexmap::IndexMap;

fn openai_toml(base_url: &str) -> String {
    format!(
        r#"
        [providers.openai]
        type = "openai"
        api_key = "sk-test"
        base_url = "{base_url}"
        "#
    )
}

fn weather_request() -> ChatCompletionRequest {
    let mut properties = IndexMap::new();
    properties.insert("location".to_owned(), PropertySchema::new("string", "City and country"));

    let mut request = ChatCompletionRequest::new(
        "gpt-4o",
        vec![InputMessage::user("What is the weather in Paris, France?")],
    );
    request.tools = vec![Tool::function(
        "get_weather",
        "Current weather for a location",
        FunctionParameters::object(properties, vec!["location".to_owned()]),
    )];
    request
}

fn chunk(delta: serde_json::Value, finish_reason: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "gpt-4o",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    })
}

#[derive(Default)]
struct Recorder {
    started: u32,
    tokens: Vec<String>,
    tool_calls: Vec<ToolCall>,
    completed: Vec<OutputMessage>,
    errors: u32,
}

impl StreamHandler for Recorder {
    fn on_start(&mut self) {
        self.started += 1;
    }

    fn on_token(&mut self, text: &str) {
        self.tokens.push(text.to_owned());
    }

    fn on_tool_call(&mut self, call: &ToolCall) {
        self.tool_calls.push(call.clone());
    }

    fn on_complete(&mut self, message: &OutputMessage) {
        self.completed.push(message.clone());
    }

    fn on_error(&mut self, _error: &LlmError) {
        self.errors += 1;
    }
}

#[tokio::test]
async fn unary_completion() {
    let mock = MockVendor::start(Canned::Json(
        StatusCode::OK,
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Bonjour!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }),
    ))
    .await
    .unwrap();

    let provider = harness::provider(&openai_toml(&mock.url("/v1")));
    let mut request = ChatCompletionRequest::new("gpt-4o", vec![InputMessage::user("Say hello in French")]);
    request.system_prompt = Some("Be terse".to_owned());

    let response = provider.create_chat_completion(&request).await.unwrap();
    assert_eq!(response.content(), "Bonjour!");
    assert_eq!(response.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(response.usage.total_tokens, 12);
    assert_eq!(response.model, "gpt-4o-2024-08-06");

    let seen = mock.single_request();
    assert_eq!(seen.path, "/v1/chat/completions");
    assert_eq!(seen.header("authorization"), Some("Bearer sk-test"));
    assert_eq!(seen.body["messages"][0]["role"], "system");
    assert_eq!(seen.body["messages"][1]["content"], "Say hello in French");
    assert!(seen.body.get("stream").is_none());
}

#[tokio::test]
async fn streamed_tool_call_is_reassembled_for_the_handler() {
    let mock = MockVendor::start(Canned::sse_data(&[
        chunk(serde_json::json!({"role": "assistant", "content": ""}), None),
        chunk(
            serde_json::json!({"tool_calls": [{"index": 0, "id": "call_abc", "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"loc"}}]}),
            None,
        ),
        chunk(
            serde_json::json!({"tool_calls": [{"index": 0, "function": {"arguments": "ation\": \"Paris,"}}]}),
            None,
        ),
        chunk(
            serde_json::json!({"tool_calls": [{"index": 0, "function": {"arguments": " France\"}"}}]}),
            None,
        ),
        chunk(serde_json::json!({}), Some("tool_calls")),
    ]))
    .await
    .unwrap();

    let provider = harness::provider(&openai_toml(&mock.url("/v1")));
    let mut recorder = Recorder::default();

    let completion = stream_chat_completion(provider.as_ref(), &weather_request(), &mut recorder)
        .await
        .unwrap();

    let call = ToolCall::new("call_abc", "get_weather", r#"{"location": "Paris, France"}"#);
    assert_eq!(recorder.started, 1);
    assert!(recorder.tokens.is_empty());
    assert_eq!(recorder.tool_calls, [call.clone()]);
    assert_eq!(recorder.completed, [OutputMessage::new(String::new(), vec![call])]);
    assert_eq!(recorder.errors, 0);
    assert_eq!(completion.finish_reason, Some(FinishReason::ToolCalls));

    let seen = mock.single_request();
    assert_eq!(seen.body["stream"], true);
    assert_eq!(seen.body["tools"][0]["function"]["name"], "get_weather");
}

#[tokio::test]
async fn streamed_text_arrives_as_deltas() {
    let mock = MockVendor::start(Canned::sse_data(&[
        chunk(serde_json::json!({"role": "assistant", "content": ""}), None),
        chunk(serde_json::json!({"content": "It is "}), None),
        chunk(serde_json::json!({"content": "sunny."}), None),
        chunk(serde_json::json!({}), Some("stop")),
    ]))
    .await
    .unwrap();

    let provider = harness::provider(&openai_toml(&mock.url("/v1")));
    let request = ChatCompletionRequest::new("gpt-4o-mini", vec![InputMessage::user("Weather?")]);
    let mut stream = provider.create_chat_completion_stream(&request).await.unwrap();

    let mut text = Vec::new();
    let mut finish = None;
    while let Some(delta) = stream.recv().await.unwrap() {
        text.push(delta.content().to_owned());
        finish = delta.finish_reason();
    }

    assert_eq!(text, ["", "It is ", "sunny.", ""]);
    assert_eq!(finish, Some(FinishReason::Stop));
    assert!(stream.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn vendor_error_body_is_surfaced() {
    let mock = MockVendor::start(Canned::Json(
        StatusCode::TOO_MANY_REQUESTS,
        serde_json::json!({
            "error": {"message": "Rate limit reached", "type": "requests", "code": "rate_limit_exceeded"}
        }),
    ))
    .await
    .unwrap();

    let provider = harness::provider(&openai_toml(&mock.url("/v1")));
    let request = ChatCompletionRequest::new("gpt-4o", vec![InputMessage::user("hi")]);
    let mut recorder = Recorder::default();

    let err = stream_chat_completion(provider.as_ref(), &request, &mut recorder)
        .await
        .unwrap_err();

    match err {
        LlmError::Api {
            status, code, message, ..
        } => {
            assert_eq!(status, Some(429));
            assert_eq!(code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(message, "Rate limit reached");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.errors, 1);
    assert_eq!(recorder.started, 0);
}

#[tokio::test]
async fn o3_mini_requests_high_reasoning_effort() {
    let mock = MockVendor::start(Canned::Json(
        StatusCode::OK,
        serde_json::json!({
            "id": "chatcmpl-2",
            "model": "o3-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{}"}, "finish_reason": "stop"}]
        }),
    ))
    .await
    .unwrap();

    let provider = harness::provider(&openai_toml(&mock.url("/v1")));
    let mut request = ChatCompletionRequest::new("o3-mini", vec![InputMessage::user("Reply with JSON")]);
    request.json_mode = true;
    request.max_tokens = Some(256);

    provider.create_chat_completion(&request).await.unwrap();

    let seen = mock.single_request();
    assert_eq!(seen.body["reasoning_effort"], "high");
    assert_eq!(seen.body["response_format"]["type"], "json_object");
    assert_eq!(seen.body["max_completion_tokens"], 256);
}

#[tokio::test]
async fn azure_routes_to_the_deployment() {
    let mock = MockVendor::start(Canned::Json(
        StatusCode::OK,
        serde_json::json!({
            "id": "chatcmpl-3",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}]
        }),
    ))
    .await
    .unwrap();

    let provider = harness::provider(&format!(
        r#"
        [providers.azure]
        type = "azure_openai"
        api_key = "azure-key"
        endpoint = "{}"
        api_version = "2024-02-01"
        "#,
        mock.url("")
    ));

    let request = ChatCompletionRequest::new("gpt-4o", vec![InputMessage::user("hi")]);
    provider.create_chat_completion(&request).await.unwrap();

    let seen = mock.single_request();
    assert_eq!(seen.path, "/openai/deployments/gpt-4o/chat/completions");
    assert_eq!(seen.query.as_deref(), Some("api-version=2024-02-01"));
    assert_eq!(seen.header("api-key"), Some("azure-key"));
    assert_eq!(seen.header("authorization"), None);
}

#[tokio::test]
async fn unknown_finish_reason_fails_the_stream() {
    let mock = MockVendor::start(Canned::sse_data(&[
        chunk(serde_json::json!({"content": "partial"}), None),
        chunk(serde_json::json!({}), Some("exploded")),
    ]))
    .await
    .unwrap();

    let provider = harness::provider(&openai_toml(&mock.url("/v1")));
    let request = ChatCompletionRequest::new("gpt-4o", vec![InputMessage::user("hi")]);
    let mut stream = provider.create_chat_completion_stream(&request).await.unwrap();

    assert_eq!(stream.recv().await.unwrap().unwrap().content(), "partial");
    assert!(matches!(
        stream.recv().await,
        Err(LlmError::Protocol(conflux_llm::ProtocolError::UnknownFinishReason { .. }))
    ));
    assert!(stream.recv().await.unwrap().is_none());
}
