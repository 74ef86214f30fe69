pub mod current_time;
pub mod recent_history;
pub mod roll_dice;

use std::sync::Arc;

use relay_engine::ToolRegistry;

use crate::dice::Dice;
use crate::history::HistoryBuffer;

/// Register every function the chat model may call.
pub fn register_defaults(registry: &mut ToolRegistry, history: Arc<HistoryBuffer>, dice: Arc<dyn Dice>) {
    registry
        .register(Arc::new(current_time::CurrentTimeTool))
        .register(Arc::new(roll_dice::RollDiceTool::new(dice)))
        .register(Arc::new(recent_history::RecentHistoryTool::new(history)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::RandomDice;

    #[test]
    fn defaults_are_registered() {
        let mut registry = ToolRegistry::new();
        register_defaults(&mut registry, Arc::new(HistoryBuffer::new(10)), Arc::new(RandomDice));
        assert_eq!(registry.names(), vec!["current_time", "recent_history", "roll_dice"]);
    }
}
