use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_core::{SharedMetadata, Stage, StageOutcome};

use crate::context::BotContext;
use crate::event::MessageEvent;

pub const REACTION_EMOJIS: &[&str] = &[
    "THUMBSUP", "SMILE", "LAUGH", "WOW", "JIAYI", "OK", "APPLAUSE", "FINGERHEART", "Fire", "DONE",
];

/// Occasionally reacts with an emoji, or replies with a sticker the chat has
/// used before.
pub struct ReactStage {
    ctx: Arc<BotContext>,
}

impl ReactStage {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage<MessageEvent> for ReactStage {
    fn name(&self) -> &str {
        "react"
    }

    async fn run(&self, event: &MessageEvent, _meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        let rate = self.ctx.settings.rates.reaction_default_rate;
        let dice = &self.ctx.dice;

        if dice.chance(rate) {
            let emoji = REACTION_EMOJIS[dice.pick(REACTION_EMOJIS.len())];
            debug!(message_id = %event.message_id, emoji, "adding reaction");
            return self
                .ctx
                .client
                .add_reaction(&event.message_id, emoji)
                .await
                .map(|_| ())
                .into();
        }

        if !dice.chance(rate) {
            return StageOutcome::skip("dice");
        }
        let materials = self.ctx.materials.list(&event.chat_id);
        if materials.is_empty() {
            return StageOutcome::skip("no materials");
        }
        let material = &materials[dice.pick(materials.len())];
        self.ctx
            .client
            .reply_content(&event.message_id, material.msg_type(), &material.content())
            .await
            .map(|_| ())
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::Material;
    use crate::testing::{context_with, event, meta_for, settings, ClientCall, RecordingChatClient, ScriptedDice};
    use relay_llm::MockTransport;
    use serde_json::json;

    fn ctx(client: Arc<RecordingChatClient>, dice: ScriptedDice) -> Arc<BotContext> {
        Arc::new(context_with(
            settings(),
            client,
            Arc::new(MockTransport::new(vec![])),
            Arc::new(dice),
        ))
    }

    #[tokio::test]
    async fn first_roll_adds_emoji() {
        let client = Arc::new(RecordingChatClient::new());
        let stage = ReactStage::new(ctx(Arc::clone(&client), ScriptedDice::new(vec![true], false).picking(1)));
        let e = event("hi");

        assert!(stage.run(&e, &meta_for(&e), &CancellationToken::new()).await.is_ok());
        assert_eq!(client.reactions(), vec![REACTION_EMOJIS[1].to_string()]);
    }

    #[tokio::test]
    async fn second_roll_replies_with_material() {
        let client = Arc::new(RecordingChatClient::new());
        let ctx = ctx(Arc::clone(&client), ScriptedDice::new(vec![false, true], false));
        let _ = ctx.materials.remember("oc_1", Material::Sticker("file_1".into()));
        let stage = ReactStage::new(ctx);
        let e = event("hi");

        assert!(stage.run(&e, &meta_for(&e), &CancellationToken::new()).await.is_ok());
        assert_eq!(
            client.calls(),
            vec![ClientCall::ReplyContent {
                message_id: "om_1".into(),
                msg_type: "sticker".into(),
                content: json!({ "file_key": "file_1" }),
            }]
        );
    }

    #[tokio::test]
    async fn no_materials_skips() {
        let client = Arc::new(RecordingChatClient::new());
        let stage = ReactStage::new(ctx(Arc::clone(&client), ScriptedDice::new(vec![false, true], false)));
        let e = event("hi");
        assert!(stage.run(&e, &meta_for(&e), &CancellationToken::new()).await.is_skip());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn reaction_failure_fails_stage() {
        let client = Arc::new(RecordingChatClient::failing_reactions());
        let stage = ReactStage::new(ctx(client, ScriptedDice::always(true)));
        let e = event("hi");
        assert!(matches!(
            stage.run(&e, &meta_for(&e), &CancellationToken::new()).await,
            StageOutcome::Fail(_)
        ));
    }
}
