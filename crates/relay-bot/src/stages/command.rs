use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use relay_core::{SharedMetadata, Stage, StageOutcome};

use crate::context::BotContext;
use crate::error::CommandError;
use crate::event::MessageEvent;
use crate::stages::{DONE, ON_IT};

/// Dispatches slash commands through the router.
pub struct CommandStage {
    ctx: Arc<BotContext>,
}

impl CommandStage {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }

    async fn reply_or_warn(&self, event: &MessageEvent, text: &str) {
        if let Err(e) = self.ctx.client.reply_text(&event.message_id, text).await {
            warn!(error = %e, message_id = %event.message_id, "failed to reply command error");
        }
    }

    async fn finish(&self, event: &MessageEvent, meta: &SharedMetadata) {
        if meta.lock().skip_done {
            return;
        }
        if let Err(e) = self.ctx.client.add_reaction(&event.message_id, DONE).await {
            warn!(error = %e, message_id = %event.message_id, "failed to add reaction");
        }
    }
}

#[async_trait]
impl Stage<MessageEvent> for CommandStage {
    fn name(&self) -> &str {
        "command"
    }

    async fn pre_run(&self, _event: &MessageEvent, meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        if !meta.lock().is_command {
            return StageOutcome::skip("not a command");
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

        let outcome = match self.ctx.router.execute(&self.ctx, event, meta, cancel).await {
            Ok(()) => {
                self.finish(event, meta).await;
                StageOutcome::Ok
            }
            Err(e @ CommandError::NotFound(_)) => {
                meta.lock().is_command = false;
                if self.ctx.is_mentioned(event) {
                    self.reply_or_warn(event, &e.to_string()).await;
                } else {
                    self.finish(event, meta).await;
                }
                StageOutcome::skip(e.to_string())
            }
            Err(e) => {
                let trace_id = meta.lock().trace_id.clone();
                error!(error = %e, trace_id = %trace_id, "command failed");
                self.reply_or_warn(event, &format!("{e}\n{}", self.ctx.linker.markdown(&trace_id)))
                    .await;
                StageOutcome::fail(e)
            }
        };

        if let Some(id) = reaction {
            if let Err(e) = client.remove_reaction(&event.message_id, &id).await {
                warn!(error = %e, message_id = %event.message_id, "failed to remove reaction");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, event, meta_for, RecordingChatClient};
    use relay_llm::MockTransport;

    fn stage(client: Arc<RecordingChatClient>) -> (CommandStage, Arc<BotContext>) {
        let ctx = Arc::new(context(client, Arc::new(MockTransport::new(vec![]))));
        (CommandStage::new(Arc::clone(&ctx)), ctx)
    }

    #[tokio::test]
    async fn skips_plain_messages() {
        let (s, _) = stage(Arc::new(RecordingChatClient::new()));
        let e = event("hello");
        assert!(s.pre_run(&e, &meta_for(&e), &CancellationToken::new()).await.is_skip());
    }

    #[tokio::test]
    async fn help_reacts_and_replies() {
        let client = Arc::new(RecordingChatClient::new());
        let (s, _) = stage(Arc::clone(&client));
        let e = event("/help");

        assert!(s.run(&e, &meta_for(&e), &CancellationToken::new()).await.is_ok());
        assert_eq!(client.reactions(), vec![ON_IT.to_string(), DONE.to_string()]);
        assert_eq!(client.replies().len(), 1);
    }

    #[tokio::test]
    async fn mute_command_mutes_chat() {
        let client = Arc::new(RecordingChatClient::new());
        let (s, ctx) = stage(Arc::clone(&client));
        let e = event("/mute 5");
        assert!(s.run(&e, &meta_for(&e), &CancellationToken::new()).await.is_ok());
        assert!(ctx.mutes.is_muted("oc_1"));
        assert_eq!(client.replies(), vec!["Muted for 5 minutes.".to_string()]);
    }

    #[tokio::test]
    async fn unknown_command_resets_flag_and_replies_when_mentioned() {
        let client = Arc::new(RecordingChatClient::new());
        let (s, _) = stage(Arc::clone(&client));
        let e = event("@_user_1 /nope");
        let meta = meta_for(&e);
        assert!(meta.lock().is_command);

        assert!(s.run(&e, &meta, &CancellationToken::new()).await.is_skip());
        assert!(!meta.lock().is_command);
        assert_eq!(client.replies(), vec!["command not found: nope".to_string()]);
    }

    #[tokio::test]
    async fn unknown_command_without_mention_stays_quiet() {
        let client = Arc::new(RecordingChatClient::new());
        let (s, _) = stage(Arc::clone(&client));
        let mut e = event("/nope");
        e.mentions.clear();

        let _ = s.run(&e, &meta_for(&e), &CancellationToken::new()).await;
        assert!(client.replies().is_empty());
        assert!(client.reactions().contains(&DONE.to_string()));
    }

    #[tokio::test]
    async fn invalid_args_reply_with_trace_link() {
        let client = Arc::new(RecordingChatClient::new());
        let (s, _) = stage(Arc::clone(&client));
        let e = event("/mute soon");

        let outcome = s.run(&e, &meta_for(&e), &CancellationToken::new()).await;
        assert!(matches!(outcome, StageOutcome::Fail(_)));
        let replies = client.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("invalid arguments for /mute"));
        assert!(replies[0].contains("[Jaeger Trace]"));
        assert!(!client.reactions().contains(&DONE.to_string()));
    }
}
