use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use relay_core::{SharedMetadata, Stage, StageOutcome};

use crate::chat_flow::run_chat;
use crate::context::BotContext;
use crate::event::MessageEvent;

/// Joins the conversation unprompted, with the imitate probability.
pub struct ChatStage {
    ctx: Arc<BotContext>,
}

impl ChatStage {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage<MessageEvent> for ChatStage {
    fn name(&self) -> &str {
        "chat"
    }

    async fn pre_run(&self, _event: &MessageEvent, meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        if meta.lock().is_command {
            return StageOutcome::skip("command");
        }
        StageOutcome::Ok
    }

    async fn run(&self, event: &MessageEvent, meta: &SharedMetadata, cancel: &CancellationToken) -> StageOutcome {
        if !self.ctx.dice.chance(self.ctx.settings.rates.imitate_default_rate) {
            return StageOutcome::skip("dice");
        }
        run_chat(&self.ctx, event, meta, "", cancel).await.into()
    }
}
