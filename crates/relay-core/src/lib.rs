pub mod errors;
pub mod event;
pub mod ids;
pub mod metadata;
pub mod stage;
pub mod tools;
pub mod transport;

pub use errors::TransportError;
pub use event::ResponseEvent;
pub use ids::{CallId, CardId, ResponseId, TraceId};
pub use metadata::{Metadata, SharedMetadata};
pub use stage::{PanicHandler, PanicReport, PanicSite, PipelineHook, Stage, StageError, StageOutcome};
pub use tools::{ToolDefinition, ToolError, ToolHandler, TurnMeta};
pub use transport::{ContinuationMessage, ModelTransport, ResponseEventStream, TurnOptions, TurnRequest};
