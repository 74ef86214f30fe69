use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use relay_core::{CallId, ResponseEvent, ResponseId, TransportError};

/// One server-sent event. `event` is `None` when the server only sent data
/// lines; the event type is then read from the payload's `type` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Parse raw SSE text into frames. Multiple `data:` lines of one event are
/// joined with `\n`. A trailing event without a blank line is still returned.
pub fn parse_sse_lines(raw: &str) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    let mut event: Option<String> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.is_empty() && (event.is_some() || !data.is_empty()) {
            frames.push(SseFrame {
                event: event.take(),
                data: data.join("\n"),
            });
            data.clear();
        }
        // comments (":") and unknown fields are ignored
    }

    if event.is_some() || !data.is_empty() {
        frames.push(SseFrame {
            event,
            data: data.join("\n"),
        });
    }

    frames
}

/// Maps Responses-API stream frames onto [`ResponseEvent`]s.
#[derive(Default)]
pub struct ResponsesSseParser {
    done: bool,
}

impl ResponsesSseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `[DONE]` sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn parse_frame(&mut self, frame: &SseFrame) -> Option<Result<ResponseEvent, TransportError>> {
        if frame.data.trim() == "[DONE]" {
            self.done = true;
            return None;
        }

        let payload: Value = match serde_json::from_str(&frame.data) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable SSE data, ignoring");
                return None;
            }
        };

        let kind = frame
            .event
            .clone()
            .or_else(|| payload.get("type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        Some(self.map_event(&kind, payload))
    }

    fn map_event(&mut self, kind: &str, payload: Value) -> Result<ResponseEvent, TransportError> {
        let other = || ResponseEvent::Other { kind: kind.to_string() };

        match kind {
            "response.created" | "response.completed" => {
                match serde_json::from_value::<ResponseEnvelope>(payload) {
                    Ok(env) => Ok(ResponseEvent::ResponseCreated {
                        response_id: ResponseId::from_raw(env.response.id),
                    }),
                    Err(e) => {
                        warn!(kind, error = %e, "malformed response envelope");
                        Ok(other())
                    }
                }
            }

            "response.output_item.added" => match serde_json::from_value::<OutputItemAdded>(payload) {
                Ok(added) if added.item.item_type == "function_call" => Ok(ResponseEvent::CallStarted {
                    call_id: CallId::from_raw(added.item.call_id.unwrap_or_default()),
                    item_id: added.item.id.unwrap_or_default(),
                    name: added.item.name.unwrap_or_default(),
                }),
                Ok(_) => Ok(other()),
                Err(e) => {
                    warn!(kind, error = %e, "malformed output item");
                    Ok(other())
                }
            },

            "response.function_call_arguments.done" => {
                match serde_json::from_value::<ArgumentsDone>(payload) {
                    Ok(done) => Ok(ResponseEvent::CallArgsDone {
                        item_id: done.item_id,
                        arguments: done.arguments,
                    }),
                    Err(e) => {
                        warn!(kind, error = %e, "malformed call arguments");
                        Ok(other())
                    }
                }
            }

            "response.reasoning_summary_text.delta" => Ok(ResponseEvent::ReasoningDelta {
                delta: delta_of(&payload),
            }),

            "response.output_text.delta" => Ok(ResponseEvent::OutputDelta {
                delta: delta_of(&payload),
            }),

            "error" => Err(remote_error(&payload)),

            "response.failed" => Err(remote_error(
                payload.pointer("/response/error").unwrap_or(&Value::Null),
            )),

            _ => Ok(other()),
        }
    }
}

fn delta_of(payload: &Value) -> String {
    payload
        .get("delta")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Accepts both `{"code","message"}` and `{"error":{"code","message"}}`.
fn remote_error(payload: &Value) -> TransportError {
    let body = payload.get("error").unwrap_or(payload);
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let code = match field("code") {
        c if c.is_empty() => field("type"),
        c => c,
    };
    TransportError::Remote {
        code: if code.is_empty() { "unknown".into() } else { code },
        message: field("message"),
    }
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    response: ResponseBody,
}

#[derive(Deserialize)]
struct ResponseBody {
    id: String,
}

#[derive(Deserialize)]
struct OutputItemAdded {
    item: OutputItem,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    id: Option<String>,
    call_id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ArgumentsDone {
    item_id: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    #[test]
    fn parse_sse_lines_basic() {
        let raw = "event: response.created\ndata: {\"a\":1}\n\nevent: response.output_text.delta\ndata: {}\n\n";
        let frames = parse_sse_lines(raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("response.created"));
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn parse_sse_lines_data_only_and_crlf() {
        let frames = parse_sse_lines("data: {\"type\":\"x\"}\r\n\r\ndata: [DONE]");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].event.is_none());
        assert_eq!(frames[1].data, "[DONE]");
    }

    #[test]
    fn created_and_completed_carry_response_id() {
        let mut p = ResponsesSseParser::new();
        let ev = p
            .parse_frame(&frame("response.created", r#"{"response":{"id":"resp_1","status":"in_progress"}}"#))
            .unwrap()
            .unwrap();
        assert_eq!(ev.response_id().map(ResponseId::as_str), Some("resp_1"));

        let ev = p
            .parse_frame(&frame("response.completed", r#"{"response":{"id":"resp_1"}}"#))
            .unwrap()
            .unwrap();
        assert!(matches!(ev, ResponseEvent::ResponseCreated { .. }));
    }

    #[test]
    fn function_call_item_starts_call() {
        let mut p = ResponsesSseParser::new();
        let ev = p
            .parse_frame(&frame(
                "response.output_item.added",
                r#"{"item":{"type":"function_call","id":"fc_1","call_id":"call_9","name":"roll_dice","arguments":""}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(
            ev,
            ResponseEvent::CallStarted {
                call_id: CallId::from_raw("call_9"),
                item_id: "fc_1".into(),
                name: "roll_dice".into(),
            }
        );
    }

    #[test]
    fn message_item_is_other() {
        let mut p = ResponsesSseParser::new();
        let ev = p
            .parse_frame(&frame("response.output_item.added", r#"{"item":{"type":"message","id":"msg_1"}}"#))
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind(), "response.output_item.added");
    }

    #[test]
    fn arguments_done() {
        let mut p = ResponsesSseParser::new();
        let ev = p
            .parse_frame(&frame(
                "response.function_call_arguments.done",
                r#"{"item_id":"fc_1","arguments":"{\"sides\":6}"}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(
            ev,
            ResponseEvent::CallArgsDone {
                item_id: "fc_1".into(),
                arguments: r#"{"sides":6}"#.into(),
            }
        );
    }

    #[test]
    fn deltas_by_payload_type() {
        let mut p = ResponsesSseParser::new();
        let data_only = SseFrame {
            event: None,
            data: r#"{"type":"response.output_text.delta","delta":"hi"}"#.into(),
        };
        assert_eq!(
            p.parse_frame(&data_only).unwrap().unwrap(),
            ResponseEvent::OutputDelta { delta: "hi".into() }
        );

        let reasoning = frame("response.reasoning_summary_text.delta", r#"{"delta":"hmm"}"#);
        assert_eq!(
            p.parse_frame(&reasoning).unwrap().unwrap(),
            ResponseEvent::ReasoningDelta { delta: "hmm".into() }
        );
    }

    #[test]
    fn error_event_is_remote_error() {
        let mut p = ResponsesSseParser::new();
        let err = p
            .parse_frame(&frame("error", r#"{"code":"rate_limit","message":"slow down"}"#))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TransportError::Remote { ref code, ref message } if code == "rate_limit" && message == "slow down"));
    }

    #[test]
    fn failed_response_is_remote_error() {
        let mut p = ResponsesSseParser::new();
        let err = p
            .parse_frame(&frame(
                "response.failed",
                r#"{"response":{"id":"r","error":{"code":"server_error","message":"oops"}}}"#,
            ))
            .unwrap()
            .unwrap_err();
        assert_eq!(err.error_kind(), "remote");
    }

    #[test]
    fn unknown_events_pass_through_as_other() {
        let mut p = ResponsesSseParser::new();
        let ev = p.parse_frame(&frame("response.in_progress", "{}")).unwrap().unwrap();
        assert_eq!(ev, ResponseEvent::Other { kind: "response.in_progress".into() });
    }

    #[test]
    fn done_sentinel_and_garbage_yield_nothing() {
        let mut p = ResponsesSseParser::new();
        assert!(p.parse_frame(&frame("response.output_text.delta", "not json")).is_none());
        assert!(!p.is_done());
        assert!(p.parse_frame(&SseFrame { event: None, data: "[DONE]".into() }).is_none());
        assert!(p.is_done());
    }
}
