use crate::ids::{CallId, ResponseId};

/// Events a model transport yields while one response streams.
///
/// Ordering within a single stream is preserved by the transport:
///
/// ResponseCreated → (ReasoningDelta | OutputDelta | CallStarted → CallArgsDone | Other)* → end
///
/// End of stream is signalled by the stream returning `None`; transport failures
/// arrive as `Err` items instead of variants here.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseEvent {
    /// The remote assigned (or re-announced) the id of the response being streamed.
    ResponseCreated { response_id: ResponseId },

    /// A function call item was opened. `item_id` is the remote's output item id,
    /// which later argument events reference.
    CallStarted { call_id: CallId, item_id: String, name: String },

    /// All arguments of a call have been streamed.
    CallArgsDone { item_id: String, arguments: String },

    ReasoningDelta { delta: String },
    OutputDelta { delta: String },

    /// Anything the engine does not interpret; kept so transports never fail on new event types.
    Other { kind: String },
}

impl ResponseEvent {
    pub fn response_id(&self) -> Option<&ResponseId> {
        match self {
            Self::ResponseCreated { response_id } => Some(response_id),
            _ => None,
        }
    }

    pub fn is_content_delta(&self) -> bool {
        matches!(self, Self::ReasoningDelta { .. } | Self::OutputDelta { .. })
    }

    /// Short name for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::ResponseCreated { .. } => "response_created",
            Self::CallStarted { .. } => "call_started",
            Self::CallArgsDone { .. } => "call_args_done",
            Self::ReasoningDelta { .. } => "reasoning_delta",
            Self::OutputDelta { .. } => "output_delta",
            Self::Other { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_classification() {
        assert!(ResponseEvent::OutputDelta { delta: "x".into() }.is_content_delta());
        assert!(ResponseEvent::ReasoningDelta { delta: "x".into() }.is_content_delta());
        assert!(!ResponseEvent::Other { kind: "ping".into() }.is_content_delta());
    }

    #[test]
    fn response_id_only_on_created() {
        let created = ResponseEvent::ResponseCreated {
            response_id: ResponseId::from_raw("resp_1"),
        };
        assert_eq!(created.response_id().map(ResponseId::as_str), Some("resp_1"));
        assert!(ResponseEvent::OutputDelta { delta: "a".into() }.response_id().is_none());
    }

    #[test]
    fn other_kind_passes_through() {
        let ev = ResponseEvent::Other { kind: "response.in_progress".into() };
        assert_eq!(ev.kind(), "response.in_progress");
    }
}
