use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_core::{SharedMetadata, Stage, StageOutcome};

use crate::context::BotContext;
use crate::event::MessageEvent;

/// Parrots a message back into the chat now and then.
pub struct RepeatStage {
    ctx: Arc<BotContext>,
}

impl RepeatStage {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }

    fn rate(&self, text: &str) -> u8 {
        let rates = &self.ctx.settings.rates;
        rates
            .repeat_word_rates
            .get(text)
            .copied()
            .unwrap_or(rates.repeat_default_rate)
    }
}

#[async_trait]
impl Stage<MessageEvent> for RepeatStage {
    fn name(&self) -> &str {
        "repeat"
    }

    async fn pre_run(&self, event: &MessageEvent, meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        if meta.lock().is_command {
            return StageOutcome::skip("command");
        }
        if self.ctx.mutes.is_muted(&event.chat_id) {
            return StageOutcome::skip("muted");
        }
        StageOutcome::Ok
    }

    async fn run(&self, event: &MessageEvent, _meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        let rate = self.rate(&event.trimmed_text());
        if !self.ctx.dice.chance(rate) {
            return StageOutcome::skip("dice");
        }
        debug!(chat_id = %event.chat_id, rate, "repeating message");

        let result = if event.message_type == "text" {
            self.ctx
                .client
                .create_message(&event.chat_id, "text", &json!({ "text": event.text_with_at_tags() }))
                .await
        } else {
            self.ctx
                .client
                .create_message(&event.chat_id, &event.message_type, &event.content)
                .await
        };
        result.map(|_| ()).into()
    }
}
