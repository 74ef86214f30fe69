pub mod coalescer;
pub mod error;
mod panic;
pub mod pipeline;
pub mod registry;
pub mod repair;
pub mod responses;

pub use coalescer::{Coalescer, CoalescerConfig, SinkError, UpdateSink};
pub use error::EngineError;
pub use pipeline::{Pipeline, RunReport, StageReport, StageStatus};
pub use registry::ToolRegistry;
pub use responses::{PartialResult, PartialStream, ResponseEngine};
