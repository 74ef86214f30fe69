use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use relay_core::{ToolError, ToolHandler, TurnMeta};

use crate::dice::Dice;

const MAX_COUNT: u32 = 20;
const MAX_SIDES: u32 = 1000;

#[derive(Deserialize)]
struct Args {
    #[serde(default = "one")]
    count: u32,
    #[serde(default = "six")]
    sides: u32,
}

fn one() -> u32 {
    1
}

fn six() -> u32 {
    6
}

pub struct RollDiceTool {
    dice: Arc<dyn Dice>,
}

impl RollDiceTool {
    pub fn new(dice: Arc<dyn Dice>) -> Self {
        Self { dice }
    }
}

#[async_trait]
impl ToolHandler for RollDiceTool {
    fn name(&self) -> &str {
        "roll_dice"
    }

    fn description(&self) -> &str {
        "Roll `count` dice with `sides` sides each and return every roll and the total"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer", "minimum": 1, "maximum": MAX_COUNT},
                "sides": {"type": "integer", "minimum": 2, "maximum": MAX_SIDES}
            }
        })
    }

    async fn handle(&self, args: &str, _meta: &TurnMeta) -> Result<String, ToolError> {
        let args: Args = serde_json::from_str(if args.trim().is_empty() { "{}" } else { args })?;
        if !(1..=MAX_COUNT).contains(&args.count) {
            return Err(ToolError::InvalidArguments(format!("count must be 1..={MAX_COUNT}")));
        }
        if !(2..=MAX_SIDES).contains(&args.sides) {
            return Err(ToolError::InvalidArguments(format!("sides must be 2..={MAX_SIDES}")));
        }

        let rolls: Vec<u32> = (0..args.count)
            .map(|_| self.dice.pick(args.sides as usize) as u32 + 1)
            .collect();
        let total: u32 = rolls.iter().sum();
        Ok(json!({ "rolls": rolls, "total": total }).to_string())
    }
}
