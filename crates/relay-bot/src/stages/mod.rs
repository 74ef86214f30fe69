//! The independent concerns run for every inbound message.

mod chat;
mod command;
mod react;
mod record;
mod repeat;
mod reply_chat;
mod word_reply;

use std::sync::Arc;

use relay_core::Stage;

use crate::context::BotContext;
use crate::event::MessageEvent;

pub use chat::ChatStage;
pub use command::CommandStage;
pub use react::{ReactStage, REACTION_EMOJIS};
pub use record::RecordStage;
pub use repeat::RepeatStage;
pub use reply_chat::ReplyChatStage;
pub use word_reply::WordReplyStage;

/// Reaction added while the bot works on a message.
pub const ON_IT: &str = "OnIt";
/// Reaction added once the bot is finished, unless the flow signalled itself.
pub const DONE: &str = "DONE";

/// Every stage, in registration order.
pub fn all(ctx: &Arc<BotContext>) -> Vec<Arc<dyn Stage<MessageEvent>>> {
    vec![
        Arc::new(RecordStage::new(Arc::clone(ctx))),
        Arc::new(RepeatStage::new(Arc::clone(ctx))),
        Arc::new(ReactStage::new(Arc::clone(ctx))),
        Arc::new(WordReplyStage::new(Arc::clone(ctx))),
        Arc::new(ReplyChatStage::new(Arc::clone(ctx))),
        Arc::new(CommandStage::new(Arc::clone(ctx))),
        Arc::new(ChatStage::new(Arc::clone(ctx))),
    ]
}
