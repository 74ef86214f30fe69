use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use relay_core::{SharedMetadata, Stage, StageOutcome};

use crate::chat_flow::run_chat;
use crate::context::BotContext;
use crate::event::MessageEvent;
use crate::stages::{DONE, ON_IT};

/// Answers direct messages and mentions through the chat flow.
pub struct ReplyChatStage {
    ctx: Arc<BotContext>,
}

impl ReplyChatStage {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage<MessageEvent> for ReplyChatStage {
    fn name(&self) -> &str {
        "reply_chat"
    }

    async fn pre_run(&self, event: &MessageEvent, meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        let (is_p2p, is_command) = {
            let meta = meta.lock();
            (meta.is_p2p, meta.is_command)
        };
        if !is_p2p && !self.ctx.is_mentioned(event) {
            return StageOutcome::skip("not mentioned");
        }
        if is_command {
            return StageOutcome::skip("command");
        }
        StageOutcome::Ok
    }

    async fn run(&self, event: &MessageEvent, meta: &SharedMetadata, cancel: &CancellationToken) -> StageOutcome {
        let client = &self.ctx.client;
        let reaction = match client.add_reaction(&event.message_id, ON_IT).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, message_id = %event.message_id, "failed to add reaction");
                None
            }
        };

        let result = run_chat(&self.ctx, event, meta, &event.trimmed_text(), cancel).await;

        if let Some(id) = reaction {
            if let Err(e) = client.remove_reaction(&event.message_id, &id).await {
                warn!(error = %e, message_id = %event.message_id, "failed to remove reaction");
            }
        }
        if !meta.lock().skip_done {
            if let Err(e) = client.add_reaction(&event.message_id, DONE).await {
                warn!(error = %e, message_id = %event.message_id, "failed to add reaction");
            }
        }
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, event, meta_for, ClientCall, RecordingChatClient};
    use relay_core::TransportError;
    use relay_llm::mock::MockResponse;
    use relay_llm::MockTransport;

    fn stage(client: Arc<RecordingChatClient>, responses: Vec<MockResponse>) -> ReplyChatStage {
        ReplyChatStage::new(Arc::new(context(client, Arc::new(MockTransport::new(responses)))))
    }

    #[tokio::test]
    async fn gated_on_mention_or_p2p() {
        let s = stage(Arc::new(RecordingChatClient::new()), vec![]);
        let cancel = CancellationToken::new();

        let mut unmentioned = event("hello");
        unmentioned.mentions.clear();
        assert!(s.pre_run(&unmentioned, &meta_for(&unmentioned), &cancel).await.is_skip());

        unmentioned.chat_type = "p2p".into();
        assert!(s.pre_run(&unmentioned, &meta_for(&unmentioned), &cancel).await.is_ok());

        let mentioned = event("@_user_1 hello");
        assert!(s.pre_run(&mentioned, &meta_for(&mentioned), &cancel).await.is_ok());

        let command = event("@_user_1 /help");
        assert!(s.pre_run(&command, &meta_for(&command), &cancel).await.is_skip());
    }

    #[tokio::test]
    async fn reacts_replies_and_cleans_up() {
        let client = Arc::new(RecordingChatClient::new());
        let s = stage(
            Arc::clone(&client),
            vec![MockResponse::text("resp_1", r#"{"decision":"reply","reply":"hey"}"#)],
        );
        let e = event("@_user_1 hello");
        let meta = meta_for(&e);

        assert!(s.run(&e, &meta, &CancellationToken::new()).await.is_ok());

        let calls = client.calls();
        assert_eq!(
            calls[0],
            ClientCall::AddReaction {
                message_id: "om_1".into(),
                emoji: ON_IT.into()
            }
        );
        assert!(calls.contains(&ClientCall::ReplyText {
            message_id: "om_1".into(),
            text: "hey".into()
        }));
        assert!(matches!(calls.last(), Some(ClientCall::RemoveReaction { reaction_id, .. }) if reaction_id == "id_0"));
        // The chat flow signals completion itself.
        assert!(meta.lock().skip_done);
        assert!(!client.reactions().contains(&DONE.to_string()));
    }

    #[tokio::test]
    async fn reaction_failure_does_not_block_reply() {
        let client = Arc::new(RecordingChatClient::failing_reactions());
        let s = stage(
            Arc::clone(&client),
            vec![MockResponse::text("resp_1", r#"{"decision":"reply","reply":"hey"}"#)],
        );
        let e = event("@_user_1 hello");
        assert!(s.run(&e, &meta_for(&e), &CancellationToken::new()).await.is_ok());
        assert_eq!(client.replies(), vec!["hey".to_string()]);
    }

    #[tokio::test]
    async fn model_failure_fails_stage_after_cleanup() {
        let client = Arc::new(RecordingChatClient::new());
        let s = stage(
            Arc::clone(&client),
            vec![MockResponse::Error(TransportError::NetworkError("down".into()))],
        );
        let e = event("@_user_1 hello");
        let outcome = s.run(&e, &meta_for(&e), &CancellationToken::new()).await;

        assert!(matches!(outcome, StageOutcome::Fail(_)));
        assert!(matches!(client.calls().last(), Some(ClientCall::RemoveReaction { .. })));
    }
}
