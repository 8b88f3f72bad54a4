mod harness;

use std::time::Duration;

use conflux_llm::{ChatCompletionRequest, InputMessage, LlmError};
use harness::mock_vendor::{Canned, MockVendor};

fn slow_openai_stream() -> Canned {
    let frames = (0..50)
        .map(|i| {
            serde_json::json!({
                "id": "chatcmpl-slow",
                "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": format!("tok{i} ")}}]
            })
            .to_string()
        })
        .collect();
    Canned::SlowSse(frames, Duration::from_millis(50))
}

fn slow_anthropic_stream() -> Canned {
    let mut frames = vec![
        serde_json::json!({"type": "message_start", "message": {"id": "msg_slow", "model": "claude-3-5-haiku-latest"}})
            .to_string(),
        serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})
            .to_string(),
    ];
    frames.extend((0..50).map(|i| {
        serde_json::json!({"type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": format!("tok{i} ")}})
        .to_string()
    }));
    Canned::SlowSse(frames, Duration::from_millis(50))
}

#[tokio::test]
async fn close_mid_stream_ends_a_direct_stream() {
    let mock = MockVendor::start(slow_openai_stream()).await.unwrap();
    let provider = harness::provider(&format!(
        r#"
        [providers.openai]
        type = "openai"
        api_key = "sk-test"
        base_url = "{}"
        "#,
        mock.url("/v1")
    ));

    let request = ChatCompletionRequest::new("gpt-4o", vec![InputMessage::user("Count slowly")]);
    let mut stream = provider.create_chat_completion_stream(&request).await.unwrap();

    assert_eq!(stream.recv().await.unwrap().unwrap().content(), "tok0 ");
    stream.close();
    stream.close();

    assert!(stream.is_terminated());
    assert!(stream.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn closer_cancels_a_pending_bridged_receive() {
    let mock = MockVendor::start(slow_anthropic_stream()).await.unwrap();
    let provider = harness::provider(&format!(
        r#"
        [providers.claude]
        type = "anthropic"
        api_key = "sk-ant-test"
        base_url = "{}"
        "#,
        mock.url("/v1")
    ));

    let request = ChatCompletionRequest::new("claude-3-5-haiku-latest", vec![InputMessage::user("Count slowly")]);
    let mut stream = provider.create_chat_completion_stream(&request).await.unwrap();

    assert_eq!(stream.recv().await.unwrap().unwrap().content(), "tok0 ");

    let closer = stream.closer();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        closer.close();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.recv().await {
                Ok(Some(_)) => {}
                other => return other,
            }
        }
    })
    .await
    .expect("stream did not observe the close");

    assert!(matches!(result, Err(LlmError::Cancelled)));
    assert!(stream.recv().await.unwrap().is_none());
}
