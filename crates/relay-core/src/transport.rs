use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;
use crate::event::ResponseEvent;
use crate::ids::{CallId, ResponseId};
use crate::tools::ToolDefinition;

/// Strictly ordered events of one remote response. `None` is end-of-stream.
/// Dropping the stream must release the underlying connection.
pub type ResponseEventStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, TransportError>> + Send>>;

/// Everything needed to open the first stream of a turn.
#[derive(Clone, Debug, Default)]
pub struct TurnRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub image_urls: Vec<String>,
    pub tools: Vec<ToolDefinition>,
    pub options: TurnOptions,
}

/// Options controlling generation behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnOptions {
    pub temperature: Option<f64>,
    /// Ask the model for a JSON object instead of free text.
    pub json_output: bool,
    /// Ask the remote to keep the response so continuations can chain to it.
    pub store: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.1),
            json_output: true,
            store: true,
        }
    }
}

/// Message sent back to the model mid-turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContinuationMessage {
    ToolOutput { call_id: CallId, output: String },
}

/// Streaming client for a generative model.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn open_stream(&self, request: &TurnRequest) -> Result<ResponseEventStream, TransportError>;

    async fn send_continuation(
        &self,
        model: &str,
        previous_response_id: Option<&ResponseId>,
        message: &ContinuationMessage,
    ) -> Result<ResponseEventStream, TransportError>;
}
