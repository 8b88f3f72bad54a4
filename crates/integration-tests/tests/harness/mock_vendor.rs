//! Mock vendor backend for integration tests
//!
//! Answers every request with one canned response and records what it received

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures_util::stream;
use tokio_util::sync::CancellationToken;

/// Response the mock sends back
#[derive(Debug, Clone)]
pub enum Canned {
    /// JSON body with a status code
    Json(StatusCode, serde_json::Value),
    /// Server-sent events as `(event name, data)` pairs
    Sse(Vec<(Option<String>, String)>),
    /// Newline-delimited JSON lines
    Ndjson(Vec<serde_json::Value>),
    /// SSE frames sent one at a time with a pause between them
    SlowSse(Vec<String>, Duration),
}

impl Canned {
    /// SSE stream of unnamed `data:` events, ending with `[DONE]`
    pub fn sse_data(events: &[serde_json::Value]) -> Self {
        let mut frames: Vec<_> = events.iter().map(|e| (None, e.to_string())).collect();
        frames.push((None, "[DONE]".to_owned()));
        Self::Sse(frames)
    }

    /// SSE stream of named events, `event:` taken from each payload's `type`
    pub fn sse_typed(events: &[serde_json::Value]) -> Self {
        Self::Sse(
            events
                .iter()
                .map(|e| (e["type"].as_str().map(str::to_owned), e.to_string()))
                .collect(),
        )
    }
}

/// Request seen by the mock
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl Recorded {
    /// Header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

struct MockState {
    canned: Canned,
    requests: Mutex<Vec<Recorded>>,
}

/// Mock vendor server bound to an ephemeral port
pub struct MockVendor {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockVendor {
    /// Start the mock server, returning immediately
    pub async fn start(canned: Canned) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            canned,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL with the given path prefix, e.g. `/v1`
    pub fn url(&self, prefix: &str) -> String {
        format!("http://{}{prefix}", self.addr)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// The only request received
    pub fn single_request(&self) -> Recorded {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one request, got {requests:?}");
        requests.into_iter().next().unwrap()
    }
}

impl Drop for MockVendor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    state.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_owned(),
        query: uri.query().map(str::to_owned),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });

    match &state.canned {
        Canned::Json(status, value) => (*status, Json(value.clone())).into_response(),
        Canned::Sse(frames) => {
            let body: String = frames
                .iter()
                .map(|(event, data)| match event {
                    Some(event) => format!("event: {event}\ndata: {data}\n\n"),
                    None => format!("data: {data}\n\n"),
                })
                .collect();
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        Canned::Ndjson(lines) => {
            let body: String = lines.iter().map(|line| format!("{line}\n")).collect();
            ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
        }
        Canned::SlowSse(frames, pause) => {
            let pause = *pause;
            let frames = frames.clone().into_iter();
            let body = stream::unfold(frames, move |mut frames| async move {
                let frame = frames.next()?;
                tokio::time::sleep(pause).await;
                Some((Ok::<_, std::io::Error>(format!("data: {frame}\n\n")), frames))
            });
            ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(body)).into_response()
        }
    }
}
