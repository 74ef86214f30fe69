use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::TraceId;
use crate::metadata::SharedMetadata;

/// Result of a stage gate or action.
#[derive(Debug)]
pub enum StageOutcome {
    /// Not applicable to this event. Not a failure.
    Skip(String),
    Fail(StageError),
    Ok,
}

impl StageOutcome {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    pub fn fail(err: impl Into<StageError>) -> Self {
        Self::Fail(err.into())
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl<E: Into<StageError>> From<Result<(), E>> for StageOutcome {
    fn from(r: Result<(), E>) -> Self {
        match r {
            Ok(()) => Self::Ok,
            Err(e) => Self::Fail(e.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Message(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StageError {
    pub fn msg(m: impl Into<String>) -> Self {
        Self::Message(m.into())
    }
}

/// One independent concern run for every inbound event.
///
/// Stages hold no per-event state; everything event-specific lives in the
/// event and the shared metadata.
#[async_trait]
pub trait Stage<E: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    /// Gate. Returning [`StageOutcome::Skip`] means `run` is never called.
    async fn pre_run(&self, _event: &E, _meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        StageOutcome::Ok
    }

    async fn run(&self, event: &E, meta: &SharedMetadata, cancel: &CancellationToken) -> StageOutcome;
}

/// Hook run once per pipeline run, before or after the stage fan-out.
#[async_trait]
pub trait PipelineHook<E: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, event: &E, meta: &SharedMetadata);
}

/// Where a caught panic happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicSite {
    MetadataBuilder,
    PreRunHook,
    StagePreRun,
    StageRun,
    DeferHook,
}

impl fmt::Display for PanicSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MetadataBuilder => "metadata_builder",
            Self::PreRunHook => "pre_run_hook",
            Self::StagePreRun => "stage_pre_run",
            Self::StageRun => "stage_run",
            Self::DeferHook => "defer_hook",
        };
        f.write_str(s)
    }
}

/// A recovered panic, as handed to the panic handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PanicReport {
    pub trace_id: TraceId,
    pub site: PanicSite,
    /// Stage or hook name.
    pub component: String,
    pub message: String,
}

/// Receives every panic the pipeline recovers.
#[async_trait]
pub trait PanicHandler<E: Send + Sync>: Send + Sync {
    async fn on_panic(&self, event: &E, report: &PanicReport);
}
