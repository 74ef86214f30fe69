//! Lifecycle hooks and the panic handler for the message pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use relay_core::{Metadata, PanicHandler, PanicReport, PipelineHook, SharedMetadata};

use crate::command::CommandRouter;
use crate::context::BotContext;
use crate::event::MessageEvent;

/// Metadata for one inbound message.
pub fn build_metadata(router: &CommandRouter, event: &MessageEvent) -> Metadata {
    let text = event.trimmed_text();
    let mut meta = Metadata::new(&event.chat_id, &event.sender_id);
    meta.is_p2p = event.is_p2p();
    meta.is_command = router.is_command(&text);
    meta.main_command = router.main_command(&text);
    meta
}

/// Logs the trace link of every run so a message can be followed end to end.
pub struct TraceLinkHook {
    ctx: Arc<BotContext>,
}

impl TraceLinkHook {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PipelineHook<MessageEvent> for TraceLinkHook {
    fn name(&self) -> &str {
        "trace_link"
    }

    async fn call(&self, event: &MessageEvent, meta: &SharedMetadata) {
        let trace_id = meta.lock().trace_id.clone();
        info!(
            message_id = %event.message_id,
            chat_id = %event.chat_id,
            trace_id = %trace_id,
            link = %self.ctx.linker.link(&trace_id),
            "handling message"
        );
    }
}

pub struct RecordHistoryHook {
    ctx: Arc<BotContext>,
}

impl RecordHistoryHook {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PipelineHook<MessageEvent> for RecordHistoryHook {
    fn name(&self) -> &str {
        "record_history"
    }

    async fn call(&self, event: &MessageEvent, _meta: &SharedMetadata) {
        self.ctx.history.record(&event.chat_id, event.history_line());
    }
}

/// Feeds non-command messages to the per-chat topic log.
pub struct TopicSubmitHook {
    ctx: Arc<BotContext>,
}

impl TopicSubmitHook {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PipelineHook<MessageEvent> for TopicSubmitHook {
    fn name(&self) -> &str {
        "topic_submit"
    }

    async fn call(&self, event: &MessageEvent, meta: &SharedMetadata) {
        if meta.lock().is_command {
            return;
        }
        self.ctx.history.submit_topic(&event.chat_id, event.history_line());
    }
}

pub struct PanicNotifier {
    ctx: Arc<BotContext>,
}

impl PanicNotifier {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PanicHandler<MessageEvent> for PanicNotifier {
    async fn on_panic(&self, event: &MessageEvent, report: &PanicReport) {
        error!(
            trace_id = %report.trace_id,
            message_id = %event.message_id,
            site = %report.site,
            component = %report.component,
            panic = %report.message,
            "panic-detected"
        );

        let text = format!(
            "Panic Detected!\n{} ({}): {}\n{}",
            report.component,
            report.site,
            report.message,
            self.ctx.linker.markdown(&report.trace_id)
        );
        if let Err(e) = self.ctx.client.reply_text(&event.message_id, &text).await {
            warn!(error = %e, message_id = %event.message_id, "failed to send panic notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, event, RecordingChatClient};
    use relay_core::metadata::shared;
    use relay_core::{PanicSite, TraceId};
    use relay_llm::MockTransport;
    use relay_telemetry::capture::capture_logs;
    use tracing::Level;

    fn ctx(client: Arc<RecordingChatClient>) -> Arc<BotContext> {
        Arc::new(context(client, Arc::new(MockTransport::new(vec![]))))
    }

    #[test]
    fn metadata_from_plain_message() {
        let meta = build_metadata(&CommandRouter::new(), &event("@_user_1 hello"));
        assert_eq!(meta.chat_id, "oc_1");
        assert_eq!(meta.user_id, "ou_sender");
        assert!(!meta.is_p2p);
        assert!(!meta.is_command);
        assert_eq!(meta.main_command, None);
    }

    #[test]
    fn metadata_from_command_behind_mention() {
        let mut e = event("@_user_1 /Mute 5");
        e.chat_type = "p2p".into();
        let meta = build_metadata(&CommandRouter::new(), &e);
        assert!(meta.is_p2p);
        assert!(meta.is_command);
        assert_eq!(meta.main_command.as_deref(), Some("mute"));
    }

    #[tokio::test]
    async fn history_and_topic_hooks() {
        let ctx = ctx(Arc::new(RecordingChatClient::new()));
        let plain = event("hello");
        let meta = shared(build_metadata(&ctx.router, &plain));
        RecordHistoryHook::new(Arc::clone(&ctx)).call(&plain, &meta).await;
        TopicSubmitHook::new(Arc::clone(&ctx)).call(&plain, &meta).await;

        let command = event("/help");
        let meta = shared(build_metadata(&ctx.router, &command));
        RecordHistoryHook::new(Arc::clone(&ctx)).call(&command, &meta).await;
        TopicSubmitHook::new(Arc::clone(&ctx)).call(&command, &meta).await;

        assert_eq!(ctx.history.len("oc_1"), 2);
        let topics = ctx.history.topics("oc_1", 10);
        assert_eq!(topics.len(), 1);
        assert!(topics[0].ends_with(": hello"));
    }

    #[tokio::test]
    async fn trace_link_is_logged() {
        let (logs, _guard) = capture_logs();
        let ctx = ctx(Arc::new(RecordingChatClient::new()));
        let e = event("hi");
        let meta = shared(build_metadata(&ctx.router, &e));
        TraceLinkHook::new(ctx).call(&e, &meta).await;

        let logged = logs.find("handling message").unwrap();
        assert_eq!(logged.field("message_id"), Some("om_1"));
        assert_eq!(logged.field("trace_id"), Some(meta.lock().trace_id.to_string().as_str()));
    }

    #[tokio::test]
    async fn panic_notifier_logs_and_replies() {
        let (logs, _guard) = capture_logs();
        let client = Arc::new(RecordingChatClient::new());
        let notifier = PanicNotifier::new(ctx(Arc::clone(&client)));
        let report = PanicReport {
            trace_id: TraceId::new(),
            site: PanicSite::StageRun,
            component: "repeat".into(),
            message: "index out of bounds".into(),
        };

        notifier.on_panic(&event("hi"), &report).await;

        assert!(logs.has_event(Level::ERROR, "panic-detected"));
        let logged = logs.find("panic-detected").unwrap();
        assert_eq!(logged.field("message_id"), Some("om_1"));
        let replies = client.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("Panic Detected!"));
        assert!(replies[0].contains("index out of bounds"));
        assert!(replies[0].contains("[Jaeger Trace]"));
    }
}
