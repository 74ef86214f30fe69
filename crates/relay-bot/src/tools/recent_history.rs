use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use relay_core::{ToolError, ToolHandler, TurnMeta};

use crate::history::HistoryBuffer;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

#[derive(Deserialize)]
struct Args {
    #[serde(default)]
    limit: Option<usize>,
}

/// Lets the model look further back in the current chat than the prompt shows.
pub struct RecentHistoryTool {
    history: Arc<HistoryBuffer>,
}

impl RecentHistoryTool {
    pub fn new(history: Arc<HistoryBuffer>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl ToolHandler for RecentHistoryTool {
    fn name(&self) -> &str {
        "recent_history"
    }

    fn description(&self) -> &str {
        "Return the most recent messages of the current chat, oldest first"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Number of messages to return",
                    "minimum": 1,
                    "maximum": MAX_LIMIT
                }
            }
        })
    }

    async fn handle(&self, args: &str, meta: &TurnMeta) -> Result<String, ToolError> {
        let args: Args = serde_json::from_str(if args.trim().is_empty() { "{}" } else { args })?;
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let lines = self.history.recent(&meta.chat_id, limit);
        if lines.is_empty() {
            return Ok("(no messages recorded for this chat)".into());
        }
        Ok(lines.join("\n"))
    }
}
