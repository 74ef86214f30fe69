use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use parking_lot::Mutex;

use relay_core::{
    CallId, ContinuationMessage, ModelTransport, ResponseEvent, ResponseEventStream, ResponseId,
    TransportError, TurnRequest,
};

/// Pre-programmed responses for deterministic tests without network calls.
pub enum MockResponse {
    /// Yield these items, then end.
    Stream(Vec<Result<ResponseEvent, TransportError>>),
    /// Yield these items, then stay open until dropped.
    Open(Vec<Result<ResponseEvent, TransportError>>),
    /// Fail the open/continuation call itself.
    Error(TransportError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn events(events: Vec<ResponseEvent>) -> Self {
        Self::Stream(events.into_iter().map(Ok).collect())
    }

    pub fn text(response_id: &str, text: &str) -> Self {
        Self::events(vec![
            created(response_id),
            ResponseEvent::OutputDelta { delta: text.to_string() },
        ])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

pub fn created(response_id: &str) -> ResponseEvent {
    ResponseEvent::ResponseCreated {
        response_id: ResponseId::from_raw(response_id),
    }
}

pub fn call_started(call_id: &str, item_id: &str, name: &str) -> ResponseEvent {
    ResponseEvent::CallStarted {
        call_id: CallId::from_raw(call_id),
        item_id: item_id.to_string(),
        name: name.to_string(),
    }
}

pub fn call_args_done(item_id: &str, arguments: &str) -> ResponseEvent {
    ResponseEvent::CallArgsDone {
        item_id: item_id.to_string(),
        arguments: arguments.to_string(),
    }
}

pub fn output(delta: &str) -> ResponseEvent {
    ResponseEvent::OutputDelta { delta: delta.to_string() }
}

pub fn reasoning(delta: &str) -> ResponseEvent {
    ResponseEvent::ReasoningDelta { delta: delta.to_string() }
}

/// A continuation as the mock received it.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedContinuation {
    pub model: String,
    pub previous_response_id: Option<ResponseId>,
    pub message: ContinuationMessage,
}

/// Serves [`MockResponse`]s in order. Opens and continuations draw from the
/// same queue.
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<TurnRequest>>,
    continuations: Mutex<Vec<RecordedContinuation>>,
    closed: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            continuations: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().clone()
    }

    pub fn continuations(&self) -> Vec<RecordedContinuation> {
        self.continuations.lock().clone()
    }

    /// Number of served streams that have been dropped.
    pub fn closed_streams(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    async fn next_stream(&self) -> Result<ResponseEventStream, TransportError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        let Some(mut current) = next else {
            return Err(TransportError::InvalidRequest(format!(
                "MockTransport: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Stream(items) => return Ok(self.guarded(stream::iter(items).boxed())),
                MockResponse::Open(items) => {
                    let s = stream::iter(items).chain(stream::pending());
                    return Ok(self.guarded(s.boxed()));
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }

    fn guarded(&self, inner: ResponseEventStream) -> ResponseEventStream {
        Box::pin(CloseGuard {
            inner,
            closed: Arc::clone(&self.closed),
        })
    }
}

#[async_trait]
impl ModelTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_stream(&self, request: &TurnRequest) -> Result<ResponseEventStream, TransportError> {
        self.requests.lock().push(request.clone());
        self.next_stream().await
    }

    async fn send_continuation(
        &self,
        model: &str,
        previous_response_id: Option<&ResponseId>,
        message: &ContinuationMessage,
    ) -> Result<ResponseEventStream, TransportError> {
        self.continuations.lock().push(RecordedContinuation {
            model: model.to_string(),
            previous_response_id: previous_response_id.cloned(),
            message: message.clone(),
        });
        self.next_stream().await
    }
}

/// Counts the drop of the wrapped stream.
struct CloseGuard {
    inner: ResponseEventStream,
    closed: Arc<AtomicUsize>,
}

impl Stream for CloseGuard {
    type Item = Result<ResponseEvent, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let _ = self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
