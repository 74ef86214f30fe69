//! Drives one model turn as a lazy stream of [`PartialResult`]s.
//!
//! Function calls are executed inline: when the model finishes streaming a
//! call's arguments, the handler runs, its output is sent back as a
//! continuation chained to the last response id, and reading resumes on the
//! stream the continuation returns.

use std::pin::Pin;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, trace, warn};

use relay_core::{
    CallId, ContinuationMessage, ModelTransport, ResponseEvent, ResponseEventStream, ResponseId,
    ToolDefinition, ToolHandler, TransportError, TurnMeta, TurnRequest,
};

use crate::error::EngineError;
use crate::panic::panic_message;
use crate::registry::ToolRegistry;
use crate::repair::decode_structured;

/// Snapshot of everything accumulated so far in a turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialResult {
    pub reasoning: String,
    pub content: String,
    /// Content decoded as JSON, re-attempted whenever the content grows.
    pub structured: Option<Value>,
    pub is_final: bool,
}

pub type PartialStream = Pin<Box<dyn Stream<Item = Result<PartialResult, EngineError>> + Send>>;

/// One function call seen during a turn.
#[derive(Clone, Debug)]
struct CallRecord {
    call_id: CallId,
    item_id: String,
    name: String,
    raw_args: String,
    result: Option<String>,
}

/// Calls of the current turn plus the single open-call pointer.
#[derive(Default)]
struct CallState {
    calls: Vec<CallRecord>,
    active: Option<usize>,
}

impl CallState {
    fn start(&mut self, call_id: CallId, item_id: String, name: String) {
        if let Some(open) = self.active {
            warn!(
                open_call = %self.calls[open].call_id,
                new_call = %call_id,
                "call started while another is open, replacing active call"
            );
        }
        self.calls.push(CallRecord {
            call_id,
            item_id,
            name,
            raw_args: String::new(),
            result: None,
        });
        self.active = Some(self.calls.len() - 1);
    }

    /// Pick the call an args-done event belongs to and close it.
    fn resolve(&mut self, item_id: &str) -> Option<usize> {
        if let Some(idx) = self.active.take() {
            if self.calls[idx].item_id != item_id {
                debug!(item_id, active = %self.calls[idx].item_id, "arguments item differs from active call");
            }
            return Some(idx);
        }
        if let Some(idx) = self.calls.iter().rposition(|c| c.item_id == item_id) {
            return Some(idx);
        }
        let last = self.calls.len().checked_sub(1)?;
        warn!(item_id, call_id = %self.calls[last].call_id, "no open call, attributing arguments to last started call");
        Some(last)
    }

    fn log_summary(&self) {
        for call in &self.calls {
            info!(
                call_id = %call.call_id,
                tool = %call.name,
                args = %call.raw_args,
                result = call.result.as_deref().unwrap_or("<not executed>"),
                "tool call"
            );
        }
    }
}

enum Step {
    Cancelled,
    Item(Option<Result<ResponseEvent, TransportError>>),
}

/// Streaming response engine. Cheap to share; each [`start`](Self::start)
/// owns its own call state and buffers.
pub struct ResponseEngine {
    transport: Arc<dyn ModelTransport>,
    registry: Arc<ToolRegistry>,
}

impl ResponseEngine {
    pub fn new(transport: Arc<dyn ModelTransport>, registry: Arc<ToolRegistry>) -> Self {
        Self { transport, registry }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Open the turn and return its partial results. Failing to open the
    /// first stream is reported here rather than through the stream.
    #[instrument(skip_all, fields(model = %request.model, trace_id = %meta.trace_id))]
    pub async fn start(&self, request: TurnRequest, meta: TurnMeta) -> Result<PartialStream, EngineError> {
        let first = self.transport.open_stream(&request).await?;
        debug!(transport = self.transport.name(), "turn opened");

        let transport = Arc::clone(&self.transport);
        let registry = Arc::clone(&self.registry);
        let model = request.model;

        let stream = async_stream::stream! {
            let mut current: ResponseEventStream = first;
            let mut calls = CallState::default();
            let mut last_response_id: Option<ResponseId> = None;
            let mut reasoning = String::new();
            let mut content = String::new();
            let mut structured: Option<Value> = None;

            loop {
                let step = tokio::select! {
                    biased;
                    () = meta.cancel.cancelled() => Step::Cancelled,
                    item = current.next() => Step::Item(item),
                };

                let event = match step {
                    Step::Cancelled => {
                        yield Err(EngineError::Cancelled);
                        break;
                    }
                    Step::Item(None) => {
                        structured = decode_structured(&content);
                        if structured.is_none() && !content.trim().is_empty() {
                            debug!("final content is not structured");
                        }
                        calls.log_summary();
                        yield Ok(PartialResult {
                            reasoning: reasoning.clone(),
                            content: content.clone(),
                            structured: structured.clone(),
                            is_final: true,
                        });
                        break;
                    }
                    Step::Item(Some(Err(e))) => {
                        warn!(error = %e, kind = e.error_kind(), "turn failed");
                        yield Err(EngineError::Transport(e));
                        break;
                    }
                    Step::Item(Some(Ok(event))) => event,
                };

                if let Some(id) = event.response_id() {
                    last_response_id = Some(id.clone());
                }

                match event {
                    ResponseEvent::CallStarted { call_id, item_id, name } => {
                        debug!(call_id = %call_id, tool = %name, "call started");
                        calls.start(call_id, item_id, name);
                    }
                    ResponseEvent::CallArgsDone { item_id, arguments } => {
                        let Some(idx) = calls.resolve(&item_id) else {
                            warn!(item_id = %item_id, "arguments for unknown call, ignoring");
                            continue;
                        };
                        calls.calls[idx].raw_args.clone_from(&arguments);
                        let name = calls.calls[idx].name.clone();

                        let Some(handler) = registry.get(&name) else {
                            warn!(tool = %name, "no handler registered, continuing");
                            continue;
                        };

                        let output = invoke_tool(handler, &arguments, &meta).await;
                        let call_id = calls.calls[idx].call_id.clone();
                        calls.calls[idx].result = Some(output.clone());

                        let message = ContinuationMessage::ToolOutput { call_id, output };
                        match transport
                            .send_continuation(&model, last_response_id.as_ref(), &message)
                            .await
                        {
                            Ok(next) => current = next,
                            Err(e) => {
                                warn!(tool = %name, error = %e, "continuation failed");
                                yield Err(EngineError::Transport(e));
                                break;
                            }
                        }
                    }
                    ResponseEvent::ReasoningDelta { delta } => {
                        reasoning.push_str(&delta);
                        yield Ok(PartialResult {
                            reasoning: reasoning.clone(),
                            content: content.clone(),
                            structured: structured.clone(),
                            is_final: false,
                        });
                    }
                    ResponseEvent::OutputDelta { delta } => {
                        content.push_str(&delta);
                        structured = decode_structured(&content);
                        yield Ok(PartialResult {
                            reasoning: reasoning.clone(),
                            content: content.clone(),
                            structured: structured.clone(),
                            is_final: false,
                        });
                    }
                    other => trace!(kind = other.kind(), "ignoring event"),
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Run the turn to the end and return only the final result.
    pub async fn complete(&self, request: TurnRequest, meta: TurnMeta) -> Result<PartialResult, EngineError> {
        let mut stream = self.start(request, meta).await?;
        while let Some(item) = stream.next().await {
            let partial = item?;
            if partial.is_final {
                return Ok(partial);
            }
        }
        Err(EngineError::Incomplete)
    }
}

/// Run a handler behind its own recovery barrier. Errors and panics become
/// the text the model sees as the call output.
async fn invoke_tool(handler: Arc<dyn ToolHandler>, args: &str, meta: &TurnMeta) -> String {
    let name = handler.name().to_string();
    match std::panic::AssertUnwindSafe(handler.handle(args, meta))
        .catch_unwind()
        .await
    {
        Ok(Ok(output)) => {
            debug!(tool = %name, "tool succeeded");
            output
        }
        Ok(Err(e)) => {
            warn!(tool = %name, error = %e, "tool failed");
            format!("[error] {e}")
        }
        Err(panic) => {
            let message = panic_message(&panic);
            warn!(tool = %name, panic = %message, trace_id = %meta.trace_id, "tool panicked");
            format!("[error] tool panicked: {message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_core::{ToolError, TraceId};
    use relay_llm::mock::{call_args_done, call_started, created, output, reasoning};
    use relay_llm::{MockResponse, MockTransport};
    use serde_json::json;

    use super::*;

    struct RecordingTool {
        name: &'static str,
        calls: AtomicUsize,
        args: Mutex<Vec<String>>,
        behavior: Behavior,
    }

    enum Behavior {
        Reply(&'static str),
        Fail,
        Panic,
    }

    impl RecordingTool {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                args: Mutex::new(Vec::new()),
                behavior,
            })
        }
    }

    #[async_trait]
    impl ToolHandler for RecordingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "records calls"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn handle(&self, args: &str, _meta: &TurnMeta) -> Result<String, ToolError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            self.args.lock().push(args.to_string());
            match self.behavior {
                Behavior::Reply(s) => Ok(s.to_string()),
                Behavior::Fail => Err(ToolError::ExecutionFailed("boom".into())),
                Behavior::Panic => panic!("tool exploded"),
            }
        }
    }

    fn engine(mock: Arc<MockTransport>, tools: Vec<Arc<dyn ToolHandler>>) -> ResponseEngine {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        ResponseEngine::new(mock, Arc::new(registry))
    }

    fn meta() -> TurnMeta {
        TurnMeta::new("oc_1", "ou_1", TraceId::new())
    }

    fn request() -> TurnRequest {
        TurnRequest {
            model: "m".into(),
            user_prompt: "hi".into(),
            ..TurnRequest::default()
        }
    }

    fn tool_output(mock: &MockTransport, idx: usize) -> (CallId, String) {
        let ContinuationMessage::ToolOutput { call_id, output } = mock.continuations()[idx].message.clone();
        (call_id, output)
    }

    #[tokio::test]
    async fn tool_call_then_text() {
        let f = RecordingTool::new("f", Behavior::Reply("42"));
        let mock = Arc::new(MockTransport::new(vec![
            MockResponse::events(vec![
                created("resp_1"),
                call_started("call_1", "item_1", "f"),
                call_args_done("item_1", "{}"),
            ]),
            MockResponse::events(vec![created("resp_2"), output("a"), output("b")]),
        ]));
        let engine = engine(mock.clone(), vec![f.clone()]);

        let results: Vec<_> = engine
            .start(request(), meta())
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*f.args.lock(), vec!["{}"]);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].content, "a");
        assert!(!results[0].is_final);
        let last = results.last().unwrap();
        assert!(last.is_final);
        assert_eq!(last.content, "ab");
        assert!(last.structured.is_none());

        let continuations = mock.continuations();
        assert_eq!(continuations.len(), 1);
        assert_eq!(continuations[0].model, "m");
        assert_eq!(continuations[0].previous_response_id, Some(ResponseId::from_raw("resp_1")));
        assert_eq!(tool_output(&mock, 0), (CallId::from_raw("call_1"), "42".to_string()));
    }

    #[tokio::test]
    async fn reasoning_and_content_accumulate_in_order() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::events(vec![
            created("r"),
            reasoning("think"),
            reasoning("ing"),
            output("{\"reply\":"),
            output("\"ok\"}"),
        ])]));
        let engine = engine(mock, vec![]);

        let results: Vec<_> = engine.start(request(), meta()).await.unwrap().collect().await;
        let contents: Vec<String> = results.iter().map(|r| r.as_ref().unwrap().content.clone()).collect();
        assert_eq!(contents, vec!["", "", "{\"reply\":", "{\"reply\":\"ok\"}", "{\"reply\":\"ok\"}"]);

        let last = results.last().unwrap().as_ref().unwrap();
        assert_eq!(last.reasoning, "thinking");
        assert_eq!(last.structured, Some(json!({"reply": "ok"})));
    }

    #[tokio::test]
    async fn structured_is_decoded_before_the_final_result() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::events(vec![
            created("r"),
            output("{\"reply\":\"ok\"}"),
            reasoning("more"),
        ])]));
        let engine = engine(mock, vec![]);

        let results: Vec<_> = engine.start(request(), meta()).await.unwrap().collect().await;
        let first = results[0].as_ref().unwrap();
        assert!(!first.is_final);
        assert_eq!(first.structured, Some(json!({"reply": "ok"})));

        let carried = results[1].as_ref().unwrap();
        assert_eq!(carried.reasoning, "more");
        assert_eq!(carried.structured, Some(json!({"reply": "ok"})));
    }

    #[tokio::test]
    async fn missing_closing_brace_is_repaired() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::text(
            "r",
            r#"{"decision":"reply","reply":"hello""#,
        )]));
        let engine = engine(mock, vec![]);

        let result = engine.complete(request(), meta()).await.unwrap();
        assert_eq!(result.structured.unwrap()["reply"], "hello");
    }

    #[tokio::test]
    async fn open_error_is_returned_immediately() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::Error(
            TransportError::AuthenticationFailed("bad key".into()),
        )]));
        let engine = engine(mock, vec![]);

        let err = engine.start(request(), meta()).await.err().unwrap();
        assert!(matches!(err, EngineError::Transport(TransportError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn continuation_error_fails_the_turn() {
        let f = RecordingTool::new("f", Behavior::Reply("ok"));
        let mock = Arc::new(MockTransport::new(vec![
            MockResponse::events(vec![
                created("r"),
                output("x"),
                call_started("c", "i", "f"),
                call_args_done("i", "{}"),
                output("never seen"),
            ]),
            MockResponse::Error(TransportError::ServerError {
                status: 502,
                body: "bad gateway".into(),
            }),
        ]));
        let engine = engine(mock, vec![f]);

        let results: Vec<_> = engine.start(request(), meta()).await.unwrap().collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().content, "x");
        assert!(matches!(
            results[1],
            Err(EngineError::Transport(TransportError::ServerError { status: 502, .. }))
        ));
    }

    #[tokio::test]
    async fn stream_error_ends_the_sequence() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::Stream(vec![
            Ok(output("a")),
            Err(TransportError::StreamInterrupted("reset".into())),
            Ok(output("b")),
        ])]));
        let engine = engine(mock, vec![]);

        let results: Vec<_> = engine.start(request(), meta()).await.unwrap().collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::events(vec![
            created("r"),
            ResponseEvent::Other { kind: "response.in_progress".into() },
            output("a"),
            ResponseEvent::Other { kind: "response.output_text.done".into() },
        ])]));
        let engine = engine(mock, vec![]);

        let results: Vec<_> = engine.start(request(), meta()).await.unwrap().collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].as_ref().unwrap().content, "a");
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_transport_stream() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::Open(vec![
            Ok(created("r")),
            Ok(output("a")),
        ])]));
        let engine = engine(mock.clone(), vec![]);

        let mut stream = engine.start(request(), meta()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "a");
        assert_eq!(mock.closed_streams(), 0);

        drop(stream);
        assert_eq!(mock.closed_streams(), 1);
    }

    #[tokio::test]
    async fn missing_handler_keeps_reading() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::events(vec![
            created("r"),
            call_started("c", "i", "unknown_tool"),
            call_args_done("i", "{}"),
            output("still here"),
        ])]));
        let engine = engine(mock.clone(), vec![]);

        let result = engine.complete(request(), meta()).await.unwrap();
        assert_eq!(result.content, "still here");
        assert!(mock.continuations().is_empty());
    }

    #[tokio::test]
    async fn handler_error_is_sent_as_text() {
        let f = RecordingTool::new("f", Behavior::Fail);
        let mock = Arc::new(MockTransport::new(vec![
            MockResponse::events(vec![created("r"), call_started("c", "i", "f"), call_args_done("i", "{}")]),
            MockResponse::text("r2", "done"),
        ]));
        let engine = engine(mock.clone(), vec![f]);

        let result = engine.complete(request(), meta()).await.unwrap();
        assert_eq!(result.content, "done");
        assert_eq!(tool_output(&mock, 0).1, "[error] execution failed: boom");
    }

    #[tokio::test]
    async fn handler_panic_is_sent_as_text() {
        let f = RecordingTool::new("f", Behavior::Panic);
        let mock = Arc::new(MockTransport::new(vec![
            MockResponse::events(vec![created("r"), call_started("c", "i", "f"), call_args_done("i", "{}")]),
            MockResponse::text("r2", "recovered"),
        ]));
        let engine = engine(mock.clone(), vec![f]);

        let result = engine.complete(request(), meta()).await.unwrap();
        assert_eq!(result.content, "recovered");
        let (_, out) = tool_output(&mock, 0);
        assert!(out.starts_with("[error]"));
        assert!(out.contains("tool exploded"));
    }

    #[tokio::test]
    async fn args_without_open_call_go_to_last_started() {
        let f = RecordingTool::new("f", Behavior::Reply("first"));
        let mock = Arc::new(MockTransport::new(vec![
            MockResponse::events(vec![
                created("r1"),
                call_started("c1", "i1", "f"),
                call_args_done("i1", r#"{"n":1}"#),
            ]),
            MockResponse::events(vec![created("r2"), call_args_done("i_other", r#"{"n":2}"#)]),
            MockResponse::text("r3", "end"),
        ]));
        let engine = engine(mock.clone(), vec![f.clone()]);

        let result = engine.complete(request(), meta()).await.unwrap();
        assert_eq!(result.content, "end");
        assert_eq!(*f.args.lock(), vec![r#"{"n":1}"#, r#"{"n":2}"#]);

        let continuations = mock.continuations();
        assert_eq!(continuations[1].previous_response_id, Some(ResponseId::from_raw("r2")));
        assert_eq!(tool_output(&mock, 1).0, CallId::from_raw("c1"));
    }

    #[tokio::test]
    async fn cancellation_ends_the_turn() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::Open(vec![Ok(output("a"))])]));
        let engine = engine(mock.clone(), vec![]);
        let turn_meta = meta();
        let cancel = turn_meta.cancel.clone();

        let mut stream = engine.start(request(), turn_meta).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(EngineError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_final() {
        let mock = Arc::new(MockTransport::new(vec![MockResponse::events(vec![])]));
        let engine = engine(mock, vec![]);

        let result = engine.complete(request(), meta()).await.unwrap();
        assert!(result.is_final);
        assert!(result.content.is_empty());
        assert!(result.structured.is_none());
    }
}
