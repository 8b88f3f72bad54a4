//! Provider-agnostic driver that pumps a stream into callbacks

use crate::error::LlmError;
use crate::provider::Provider;
use crate::stream::ChatCompletionStream;
use crate::types::{ChatCompletionRequest, FinishReason, OutputMessage, ToolCall, Usage};

/// Callbacks invoked while a completion streams
///
/// Every method defaults to doing nothing. After `on_complete` or `on_error`
/// no further callbacks fire.
pub trait StreamHandler: Send {
    /// Called once before the first delta is received
    fn on_start(&mut self) {}

    /// Called with each non-empty piece of generated text
    fn on_token(&mut self, _text: &str) {}

    /// Called with the last completed tool call when the turn ends for tool use
    fn on_tool_call(&mut self, _call: &ToolCall) {}

    /// Called with the fully accumulated message when the turn ends
    fn on_complete(&mut self, _message: &OutputMessage) {}

    /// Called when opening or reading the stream fails
    fn on_error(&mut self, _error: &LlmError) {}
}

/// Handler that ignores every callback
struct Silent;

impl StreamHandler for Silent {}

/// Accumulated result of a drained stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Full text and every tool call of the turn
    pub message: OutputMessage,
    /// `None` when the vendor stream ended without a terminating delta
    pub finish_reason: Option<FinishReason>,
    /// Usage reported on the last delta that carried any
    pub usage: Usage,
}

/// Open a stream on `provider` and pump it into `handler`
///
/// Errors are reported to `handler.on_error` and returned.
pub async fn stream_chat_completion<H>(
    provider: &dyn Provider,
    request: &ChatCompletionRequest,
    handler: &mut H,
) -> Result<Completion, LlmError>
where
    H: StreamHandler + ?Sized,
{
    let stream = match provider.create_chat_completion_stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            handler.on_error(&e);
            return Err(e);
        }
    };

    pump(stream, handler).await
}

/// Pump an already open stream into `handler`, closing it on exit
///
/// Stops at the first terminating delta or error. Errors are reported to
/// `handler.on_error` and returned.
pub async fn pump<H>(mut stream: ChatCompletionStream, handler: &mut H) -> Result<Completion, LlmError>
where
    H: StreamHandler + ?Sized,
{
    handler.on_start();

    let result = accumulate(&mut stream, handler).await;
    stream.close();

    if let Err(e) = &result {
        tracing::debug!(error = %e, "stream ended with error");
        handler.on_error(e);
    }
    result
}

/// Pump a stream to its end without callbacks
pub async fn drain(stream: ChatCompletionStream) -> Result<Completion, LlmError> {
    pump(stream, &mut Silent).await
}

async fn accumulate<H>(stream: &mut ChatCompletionStream, handler: &mut H) -> Result<Completion, LlmError>
where
    H: StreamHandler + ?Sized,
{
    let mut content = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage = Usage::default();

    while let Some(delta) = stream.recv().await? {
        if delta.usage != Usage::default() {
            usage = delta.usage;
        }

        let Some(choice) = delta.choices.into_iter().next() else {
            continue;
        };

        if !choice.message.content.is_empty() {
            handler.on_token(&choice.message.content);
            content.push_str(&choice.message.content);
        }
        tool_calls.extend(choice.message.tool_calls);

        if choice.finish_reason == Some(FinishReason::ToolCalls)
            && let Some(call) = tool_calls.last()
        {
            handler.on_tool_call(call);
        }

        if let Some(reason) = choice.finish_reason {
            let message = OutputMessage::new(content, tool_calls);
            handler.on_complete(&message);
            return Ok(Completion {
                message,
                finish_reason: Some(reason),
                usage,
            });
        }
    }

    Ok(Completion {
        message: OutputMessage::new(content, tool_calls),
        finish_reason: None,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::convert::openai::OpenAiStreamNormalizer;
    use crate::protocol::openai::{OpenAiResponse, OpenAiStreamChunk};
    use crate::stream::{EventStream, normalized};
    use crate::types::ChatCompletionResponse;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Start,
        Token(String),
        ToolCall(ToolCall),
        Complete(OutputMessage),
        Error,
    }

    #[derive(Default)]
    struct Recorder(Vec<Event>);

    impl StreamHandler for Recorder {
        fn on_start(&mut self) {
            self.0.push(Event::Start);
        }

        fn on_token(&mut self, text: &str) {
            self.0.push(Event::Token(text.to_owned()));
        }

        fn on_tool_call(&mut self, call: &ToolCall) {
            self.0.push(Event::ToolCall(call.clone()));
        }

        fn on_complete(&mut self, message: &OutputMessage) {
            self.0.push(Event::Complete(message.clone()));
        }

        fn on_error(&mut self, _error: &LlmError) {
            self.0.push(Event::Error);
        }
    }

    fn openai_stream(chunks: Vec<serde_json::Value>) -> ChatCompletionStream {
        let events: EventStream<OpenAiStreamChunk> = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(serde_json::from_value(c).unwrap()))
                .collect::<Vec<_>>(),
        )
        .boxed();
        ChatCompletionStream::new(normalized(events, OpenAiStreamNormalizer::new()))
    }

    fn fragmented_weather_call() -> Vec<serde_json::Value> {
        let delta = |tool_call: serde_json::Value| {
            serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"tool_calls": [tool_call]}}]
            })
        };

        vec![
            serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]
            }),
            delta(serde_json::json!({"index": 0, "id": "call_w", "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"loca"}})),
            delta(serde_json::json!({"index": 0, "function": {"arguments": "tion\": \"Paris, "}})),
            delta(serde_json::json!({"index": 0, "function": {"arguments": "France\"}"}})),
            serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
            }),
        ]
    }

    fn weather_call() -> ToolCall {
        ToolCall::new("call_w", "get_weather", r#"{"location": "Paris, France"}"#)
    }

    #[tokio::test]
    async fn fragmented_tool_call_reaches_handler_once() {
        let mut recorder = Recorder::default();
        let completion = pump(openai_stream(fragmented_weather_call()), &mut recorder)
            .await
            .unwrap();

        let expected = OutputMessage::new(String::new(), vec![weather_call()]);
        assert_eq!(
            recorder.0,
            [
                Event::Start,
                Event::ToolCall(weather_call()),
                Event::Complete(expected.clone()),
            ]
        );
        assert_eq!(completion.message, expected);
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn drained_stream_matches_unary_response() {
        let unary: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_w",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\": \"Paris, France\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let unary = ChatCompletionResponse::try_from(unary).unwrap();

        let drained = drain(openai_stream(fragmented_weather_call())).await.unwrap();

        assert_eq!(drained.message.content, unary.content());
        assert_eq!(drained.message.tool_calls, unary.tool_calls());
        assert_eq!(drained.finish_reason, unary.finish_reason());
    }

    #[tokio::test]
    async fn tokens_accumulate_into_the_final_message() {
        let text = |content: &str| {
            serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": content}}]
            })
        };
        let chunks = vec![
            text("Bon"),
            text("jour"),
            serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            }),
        ];

        let mut recorder = Recorder::default();
        let completion = pump(openai_stream(chunks), &mut recorder).await.unwrap();

        assert_eq!(
            recorder.0,
            [
                Event::Start,
                Event::Token("Bon".to_owned()),
                Event::Token("jour".to_owned()),
                Event::Complete(OutputMessage::new("Bonjour".to_owned(), Vec::new())),
            ]
        );
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn receive_error_stops_pumping() {
        let events: EventStream<OpenAiStreamChunk> = stream::iter(vec![
            Ok(serde_json::from_value(serde_json::json!({
                "id": "c1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": "partial"}}]
            }))
            .unwrap()),
            Err(LlmError::Transport("connection reset".to_owned())),
        ])
        .boxed();
        let stream = ChatCompletionStream::new(normalized(events, OpenAiStreamNormalizer::new()));

        let mut recorder = Recorder::default();
        let err = pump(stream, &mut recorder).await.unwrap_err();

        assert!(matches!(err, LlmError::Transport(_)));
        assert_eq!(
            recorder.0,
            [Event::Start, Event::Token("partial".to_owned()), Event::Error]
        );
    }

    #[tokio::test]
    async fn stream_without_terminating_delta_is_not_completed() {
        let chunks = vec![serde_json::json!({
            "id": "c1", "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": "cut off"}}]
        })];

        let mut recorder = Recorder::default();
        let completion = pump(openai_stream(chunks), &mut recorder).await.unwrap();

        assert_eq!(completion.finish_reason, None);
        assert_eq!(completion.message.content, "cut off");
        assert!(!recorder.0.iter().any(|e| matches!(e, Event::Complete(_))));
    }
}
