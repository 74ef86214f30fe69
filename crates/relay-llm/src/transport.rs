use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use relay_core::{
    ContinuationMessage, ModelTransport, ResponseEvent, ResponseEventStream, ResponseId,
    TransportError, TurnRequest,
};

use crate::sse::{self, ResponsesSseParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }
}

/// Streaming client for a Responses-style API (`POST {base}/responses`).
pub struct ResponsesTransport {
    client: Client,
    config: TransportConfig,
}

impl ResponsesTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    async fn post(&self, body: &Value) -> Result<ResponseEventStream, TransportError> {
        let mut req = self
            .client
            .post(self.endpoint())
            .header("accept", "text/event-stream")
            .json(body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.config.connect_timeout)
            } else {
                TransportError::NetworkError(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

#[async_trait]
impl ModelTransport for ResponsesTransport {
    fn name(&self) -> &str {
        "responses"
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn open_stream(&self, request: &TurnRequest) -> Result<ResponseEventStream, TransportError> {
        let body = build_turn_body(request);
        debug!(tools = request.tools.len(), images = request.image_urls.len(), "opening response stream");
        self.post(&body).await
    }

    #[instrument(skip_all, fields(model = %model, previous = ?previous_response_id))]
    async fn send_continuation(
        &self,
        model: &str,
        previous_response_id: Option<&ResponseId>,
        message: &ContinuationMessage,
    ) -> Result<ResponseEventStream, TransportError> {
        let body = build_continuation_body(model, previous_response_id, message);
        self.post(&body).await
    }
}

/// Request body for the first stream of a turn.
pub fn build_turn_body(request: &TurnRequest) -> Value {
    let mut user_content = vec![json!({"type": "input_text", "text": request.user_prompt})];
    user_content.extend(
        request
            .image_urls
            .iter()
            .map(|url| json!({"type": "input_image", "image_url": url})),
    );

    let mut input = Vec::new();
    if !request.system_prompt.is_empty() {
        input.push(json!({
            "role": "system",
            "content": [{"type": "input_text", "text": request.system_prompt}],
        }));
    }
    input.push(json!({"role": "user", "content": user_content}));

    let mut body = json!({
        "model": request.model,
        "input": input,
        "store": request.options.store,
        "stream": true,
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                })
            })
            .collect();
    }
    if let Some(t) = request.options.temperature {
        body["temperature"] = json!(t);
    }
    if request.options.json_output {
        body["text"] = json!({"format": {"type": "json_object"}});
    }
    body
}

/// Request body chaining a tool result onto `previous_response_id`.
pub fn build_continuation_body(
    model: &str,
    previous_response_id: Option<&ResponseId>,
    message: &ContinuationMessage,
) -> Value {
    let item = match message {
        ContinuationMessage::ToolOutput { call_id, output } => json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }),
    };
    let mut body = json!({
        "model": model,
        "input": [item],
        "store": true,
        "stream": true,
    });
    if let Some(prev) = previous_response_id {
        body["previous_response_id"] = json!(prev);
    }
    body
}

/// Wraps the HTTP byte stream and yields parsed response events.
/// If no bytes arrive within the idle window the stream fails and ends.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    parser: ResponsesSseParser,
    buffer: Vec<u8>,
    pending: VecDeque<Result<ResponseEvent, TransportError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: ResponsesSseParser::new(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn drain_frames(&mut self, text: &str) {
        for frame in sse::parse_sse_lines(text) {
            if let Some(ev) = self.parser.parse_frame(&frame) {
                self.pending.push_back(ev);
            }
        }
    }

    fn process_buffer(&mut self) {
        while let Some((pos, sep)) = frame_end(&self.buffer) {
            let chunk: Vec<u8> = self.buffer.drain(..pos + sep).collect();
            let text = String::from_utf8_lossy(&chunk).into_owned();
            self.drain_frames(&text);
        }
    }

    fn next_pending(&mut self) -> Option<Result<ResponseEvent, TransportError>> {
        let item = self.pending.pop_front()?;
        if item.is_err() {
            self.finished = true;
            self.pending.clear();
        }
        Some(item)
    }
}

/// Position and length of the first blank-line separator.
fn frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl Stream for SseStream {
    type Item = Result<ResponseEvent, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.next_pending() {
            return Poll::Ready(Some(item));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.process_buffer();
                    if self.parser.is_done() {
                        self.finished = true;
                    }

                    if let Some(item) = self.next_pending() {
                        return Poll::Ready(Some(item));
                    }
                    if self.finished {
                        return Poll::Ready(None);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(TransportError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        let text = String::from_utf8_lossy(&remaining).into_owned();
                        self.drain_frames(&text);
                    }
                    return Poll::Ready(self.next_pending());
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(TransportError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
