//! Canonical streaming contract
//!
//! Every provider stream is a [`ChatCompletionStream`]: a pull handle over
//! normalized deltas. Vendor events are turned into deltas by a
//! [`StreamNormalizer`], either directly on the caller's task or behind a
//! bounded queue fed by one background worker.

mod finish;
mod text;
mod tool_calls;

use std::pin::Pin;

use futures_util::{Stream, StreamExt, stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use finish::{VendorFinishReason, canonical_finish_reason, parse_finish_reason, reconcile_finish_reason};
pub use text::TextAccumulator;
pub use tool_calls::{ToolCallAssembler, ToolCallFragment};

use crate::error::LlmError;
use crate::types::ChatCompletionResponse;

/// Boxed stream of normalized deltas
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionResponse, LlmError>> + Send>>;

/// Boxed stream of raw vendor events
pub type EventStream<E> = Pin<Box<dyn Stream<Item = Result<E, LlmError>> + Send>>;

/// Per-vendor state machine turning raw events into canonical deltas
pub trait StreamNormalizer: Send + 'static {
    /// Decoded vendor event
    type Event: Send + 'static;

    /// Consume one event, producing a delta when the event carries one
    fn normalize(&mut self, event: Self::Event) -> Result<Option<ChatCompletionResponse>, LlmError>;

    /// Called when the vendor stream ends without a terminating delta
    ///
    /// Fails if a tool call is left half-assembled.
    fn finish(&mut self) -> Result<Option<ChatCompletionResponse>, LlmError>;
}

/// Drive a normalizer over an event stream
pub fn normalized<N>(events: EventStream<N::Event>, normalizer: N) -> DeltaStream
where
    N: StreamNormalizer,
{
    stream::unfold(Some((events, normalizer)), |state| async move {
        let (mut events, mut normalizer) = state?;

        loop {
            match events.next().await {
                Some(Ok(event)) => match normalizer.normalize(event) {
                    Ok(Some(delta)) => return Some((Ok(delta), Some((events, normalizer)))),
                    Ok(None) => {}
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    return match normalizer.finish() {
                        Ok(Some(delta)) => Some((Ok(delta), None)),
                        Ok(None) => None,
                        Err(e) => Some((Err(e), None)),
                    };
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Closed,
}

/// Pull handle over a normalized completion stream
///
/// `recv` yields deltas until one carries a finish reason; the call after
/// that returns `Ok(None)`. Closing is idempotent and may happen at any time,
/// including from another task through a [`StreamCloser`].
pub struct ChatCompletionStream {
    inner: DeltaStream,
    token: CancellationToken,
    state: State,
}

impl ChatCompletionStream {
    /// Wrap a delta stream pulled directly on the caller's task
    pub fn new(inner: DeltaStream) -> Self {
        Self::with_token(inner, CancellationToken::new())
    }

    fn with_token(inner: DeltaStream, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            state: State::Open,
        }
    }

    /// Bridge an event stream through a background worker and bounded queue
    ///
    /// The worker forwards raw events in order and blocks when the queue is
    /// full. Normalization happens on the receiving side. Closing the handle
    /// cancels the worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bridged<N>(events: EventStream<N::Event>, normalizer: N, capacity: usize) -> Self
    where
        N: StreamNormalizer,
    {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(capacity.max(1));

        tokio::spawn(forward_events(events, tx, token.clone()));

        let queued = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed();

        Self::with_token(normalized(queued, normalizer), token)
    }

    /// Receive the next delta
    ///
    /// Returns `Ok(None)` at the end of the stream and on every call after a
    /// terminating delta, an error, or `close`. A stream cancelled through a
    /// closer reports `LlmError::Cancelled` once.
    pub async fn recv(&mut self) -> Result<Option<ChatCompletionResponse>, LlmError> {
        if self.state != State::Open {
            return Ok(None);
        }

        let next = tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            next = self.inner.next() => Some(next),
        };

        let Some(next) = next else {
            self.release(State::Closed);
            return Err(LlmError::Cancelled);
        };

        match next {
            Some(Ok(delta)) => {
                if delta.finish_reason().is_some() {
                    self.release(State::Finished);
                }
                Ok(Some(delta))
            }
            Some(Err(e)) => {
                self.release(State::Finished);
                Err(e)
            }
            None => {
                self.release(State::Finished);
                Ok(None)
            }
        }
    }

    /// Stop the stream and release its resources
    ///
    /// Safe to call repeatedly and after the stream has finished.
    pub fn close(&mut self) {
        if self.state != State::Closed {
            self.release(State::Closed);
        }
    }

    /// Handle that closes this stream from another task
    pub fn closer(&self) -> StreamCloser {
        StreamCloser(self.token.clone())
    }

    /// Whether the stream will yield no more deltas
    pub fn is_terminated(&self) -> bool {
        self.state != State::Open
    }

    fn release(&mut self, state: State) {
        self.state = state;
        self.inner = stream::empty().boxed();
        self.token.cancel();
    }
}

impl Drop for ChatCompletionStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for ChatCompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionStream")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle that closes a [`ChatCompletionStream`]
#[derive(Debug, Clone)]
pub struct StreamCloser(CancellationToken);

impl StreamCloser {
    /// Cancel the stream; a pending `recv` returns `LlmError::Cancelled`
    pub fn close(&self) {
        self.0.cancel();
    }

    /// Whether the stream has been closed or has finished
    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }
}

async fn forward_events<E: Send + 'static>(
    mut events: EventStream<E>,
    tx: mpsc::Sender<Result<E, LlmError>>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = events.next() => next,
        };

        let Some(item) = next else {
            break;
        };
        let failed = item.is_err();

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            sent = tx.send(item) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        if failed {
            break;
        }
    }

    tracing::debug!(cancelled = token.is_cancelled(), "stream worker exited");
}
