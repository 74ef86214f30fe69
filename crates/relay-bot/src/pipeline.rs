use std::sync::Arc;

use relay_engine::Pipeline;

use crate::context::BotContext;
use crate::event::MessageEvent;
use crate::hooks::{build_metadata, PanicNotifier, RecordHistoryHook, TopicSubmitHook, TraceLinkHook};
use crate::stages;

/// Wire the message pipeline: metadata builder, every stage, the trace-link
/// pre-run hook, the history and topic defer hooks, and the panic notifier.
pub fn build_pipeline(ctx: Arc<BotContext>) -> Pipeline<MessageEvent> {
    let router = ctx.router.clone();
    let mut pipeline = Pipeline::new("message", move |event: &MessageEvent| build_metadata(&router, event));
    for stage in stages::all(&ctx) {
        let _ = pipeline.register(stage);
    }
    pipeline
        .with_pre_run(Arc::new(TraceLinkHook::new(Arc::clone(&ctx))))
        .with_defer(Arc::new(RecordHistoryHook::new(Arc::clone(&ctx))))
        .with_defer(Arc::new(TopicSubmitHook::new(Arc::clone(&ctx))))
        .on_panic(Arc::new(PanicNotifier::new(ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{DONE, ON_IT};
    use crate::testing::{context, context_with, event, settings, ClientCall, RecordingChatClient, ScriptedDice};
    use relay_engine::StageStatus;
    use relay_llm::mock::MockResponse;
    use relay_llm::MockTransport;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn registers_every_stage_in_order() {
        let ctx = Arc::new(context(
            Arc::new(RecordingChatClient::new()),
            Arc::new(MockTransport::new(vec![])),
        ));
        let pipeline = build_pipeline(ctx);
        assert_eq!(
            pipeline.stage_names(),
            vec!["record", "repeat", "react", "word_reply", "reply_chat", "command", "chat"]
        );
    }

    #[tokio::test]
    async fn mention_runs_chat_and_records_history() {
        let client = Arc::new(RecordingChatClient::new());
        let ctx = Arc::new(context(
            client.clone(),
            Arc::new(MockTransport::new(vec![MockResponse::text(
                "resp_1",
                r#"{"decision":"reply","reply":"hi there"}"#,
            )])),
        ));
        let pipeline = build_pipeline(Arc::clone(&ctx));

        let report = pipeline
            .run(Arc::new(event("@_user_1 hello")), CancellationToken::new())
            .await;

        assert!(!report.aborted);
        assert_eq!(report.stage("reply_chat").map(|s| &s.status), Some(&StageStatus::Ok));
        assert!(matches!(
            report.stage("command").map(|s| &s.status),
            Some(StageStatus::Skipped(_))
        ));
        assert!(report.metadata.skip_done);
        assert_eq!(client.replies(), vec!["hi there".to_string()]);
        assert_eq!(ctx.history.len("oc_1"), 1);
        assert_eq!(ctx.history.topics("oc_1", 10).len(), 1);
    }

    #[tokio::test]
    async fn command_message_is_not_a_topic() {
        let client = Arc::new(RecordingChatClient::new());
        let ctx = Arc::new(context(client.clone(), Arc::new(MockTransport::new(vec![]))));
        let pipeline = build_pipeline(Arc::clone(&ctx));

        let report = pipeline.run(Arc::new(event("/help")), CancellationToken::new()).await;

        assert_eq!(report.stage("command").map(|s| &s.status), Some(&StageStatus::Ok));
        assert_eq!(report.stage("reply_chat").map(|s| &s.status), Some(&StageStatus::Skipped("command".into())));
        assert_eq!(client.reactions(), vec![ON_IT.to_string(), DONE.to_string()]);
        assert_eq!(ctx.history.len("oc_1"), 1);
        assert!(ctx.history.topics("oc_1", 10).is_empty());
    }

    #[tokio::test]
    async fn unknown_command_becomes_a_topic() {
        let ctx = Arc::new(context(
            Arc::new(RecordingChatClient::new()),
            Arc::new(MockTransport::new(vec![])),
        ));
        let pipeline = build_pipeline(Arc::clone(&ctx));

        let mut e = event("/nope");
        e.mentions.clear();
        let report = pipeline.run(Arc::new(e), CancellationToken::new()).await;

        assert!(!report.metadata.is_command);
        assert_eq!(ctx.history.topics("oc_1", 10).len(), 1);
    }

    #[tokio::test]
    async fn repeat_respects_the_dice() {
        let client = Arc::new(RecordingChatClient::new());
        let mut s = settings();
        s.rates.repeat_default_rate = 100;
        let ctx = Arc::new(context_with(
            s,
            client.clone(),
            Arc::new(MockTransport::new(vec![])),
            Arc::new(ScriptedDice::always(false)),
        ));
        let pipeline = build_pipeline(ctx);

        let mut e = event("so true");
        e.mentions.clear();
        let report = pipeline.run(Arc::new(e), CancellationToken::new()).await;

        // Dice never fires, so nothing is sent.
        assert_eq!(report.stage("repeat").map(|s| &s.status), Some(&StageStatus::Skipped("dice".into())));
        assert!(client.calls().iter().all(|c| !matches!(c, ClientCall::CreateMessage { .. })));
    }
}
