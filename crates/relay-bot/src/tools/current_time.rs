use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde::Deserialize;

use relay_core::{ToolError, ToolHandler, TurnMeta};

const DEFAULT_UTC_OFFSET: i32 = 8;

#[derive(Deserialize)]
struct Args {
    #[serde(default = "default_offset")]
    utc_offset: i32,
}

fn default_offset() -> i32 {
    DEFAULT_UTC_OFFSET
}

/// Current wall-clock time at a given UTC offset.
pub struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Defaults to UTC+8."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "integer",
                    "description": "Hours east of UTC, between -12 and 14",
                    "minimum": -12,
                    "maximum": 14
                }
            }
        })
    }

    async fn handle(&self, args: &str, _meta: &TurnMeta) -> Result<String, ToolError> {
        let args: Args = if args.trim().is_empty() {
            Args {
                utc_offset: DEFAULT_UTC_OFFSET,
            }
        } else {
            serde_json::from_str(args)?
        };

        if !(-12..=14).contains(&args.utc_offset) {
            return Err(ToolError::InvalidArguments(format!(
                "utc_offset out of range: {}",
                args.utc_offset
            )));
        }
        let offset = FixedOffset::east_opt(args.utc_offset * 3600)
            .ok_or_else(|| ToolError::InvalidArguments(format!("invalid utc_offset: {}", args.utc_offset)))?;

        let now = Utc::now().with_timezone(&offset);
        Ok(now.format("%Y-%m-%d %H:%M:%S %:z (%A)").to_string())
    }
}
