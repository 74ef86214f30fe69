use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::TraceId;

/// Context handed to a tool handler for the turn that invoked it.
#[derive(Clone, Debug)]
pub struct TurnMeta {
    pub chat_id: String,
    pub user_id: String,
    pub trace_id: TraceId,
    pub cancel: CancellationToken,
}

impl TurnMeta {
    pub fn new(chat_id: impl Into<String>, user_id: impl Into<String>, trace_id: TraceId) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            trace_id,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Tool definition sent to the model as part of the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A function the model may call mid-turn.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// `args` is the raw JSON argument string exactly as the model produced it.
    async fn handle(&self, args: &str, meta: &TurnMeta) -> Result<String, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArguments(e.to_string())
    }
}
