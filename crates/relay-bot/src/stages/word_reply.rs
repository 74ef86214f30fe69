use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_core::{SharedMetadata, Stage, StageOutcome};
use relay_settings::{MatchType, ReplyType, WordReplyRule};

use crate::context::BotContext;
use crate::event::MessageEvent;

enum Matcher {
    Full(String),
    Substr(String),
    Regex(Regex),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Full(keyword) => text == keyword,
            Self::Substr(keyword) => text.contains(keyword.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

struct CompiledRule {
    matcher: Matcher,
    rule: WordReplyRule,
}

/// Replies to configured keywords.
pub struct WordReplyStage {
    ctx: Arc<BotContext>,
    rules: Vec<CompiledRule>,
}

impl WordReplyStage {
    /// Rules with an invalid regex are dropped with a warning.
    pub fn new(ctx: Arc<BotContext>) -> Self {
        let rules = ctx
            .settings
            .word_replies
            .iter()
            .filter_map(|rule| {
                let matcher = match rule.match_type {
                    MatchType::Full => Matcher::Full(rule.keyword.clone()),
                    MatchType::Substr => Matcher::Substr(rule.keyword.clone()),
                    MatchType::Regex => match Regex::new(&rule.keyword) {
                        Ok(re) => Matcher::Regex(re),
                        Err(e) => {
                            warn!(keyword = %rule.keyword, error = %e, "dropping word reply rule");
                            return None;
                        }
                    },
                };
                Some(CompiledRule {
                    matcher,
                    rule: rule.clone(),
                })
            })
            .collect();
        Self { ctx, rules }
    }

    /// Rules bound to this chat win over global ones.
    fn candidates(&self, chat_id: &str, text: &str) -> Vec<&WordReplyRule> {
        let matched: Vec<&WordReplyRule> = self
            .rules
            .iter()
            .filter(|c| c.matcher.matches(text))
            .map(|c| &c.rule)
            .collect();
        let local: Vec<&WordReplyRule> = matched
            .iter()
            .copied()
            .filter(|r| r.chat_id.as_deref() == Some(chat_id))
            .collect();
        if !local.is_empty() {
            return local;
        }
        matched.into_iter().filter(|r| r.chat_id.is_none()).collect()
    }
}

#[async_trait]
impl Stage<MessageEvent> for WordReplyStage {
    fn name(&self) -> &str {
        "word_reply"
    }

    async fn pre_run(&self, _event: &MessageEvent, meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        if meta.lock().is_command {
            return StageOutcome::skip("command");
        }
        if self.rules.is_empty() {
            return StageOutcome::skip("no rules");
        }
        StageOutcome::Ok
    }

    async fn run(&self, event: &MessageEvent, _meta: &SharedMetadata, _cancel: &CancellationToken) -> StageOutcome {
        let candidates = self.candidates(&event.chat_id, &event.trimmed_text());
        if candidates.is_empty() {
            return StageOutcome::skip("no match");
        }
        let rule = candidates[self.ctx.dice.pick(candidates.len())];
        debug!(keyword = %rule.keyword, "word reply matched");

        let client = &self.ctx.client;
        let result = match rule.reply_type {
            ReplyType::Text => client.reply_text(&event.message_id, &rule.reply).await,
            ReplyType::Image if rule.reply.starts_with("img") => {
                client
                    .reply_content(&event.message_id, "image", &json!({ "image_key": rule.reply }))
                    .await
            }
            ReplyType::Image => {
                client
                    .reply_content(&event.message_id, "sticker", &json!({ "file_key": rule.reply }))
                    .await
            }
        };
        result.map(|_| ()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, event, meta_for, settings, ClientCall, RecordingChatClient, ScriptedDice};
    use relay_llm::MockTransport;
    use relay_telemetry::capture::capture_logs;
    use tracing::Level;

    fn rule(keyword: &str, match_type: MatchType, reply: &str) -> WordReplyRule {
        WordReplyRule {
            keyword: keyword.into(),
            match_type,
            reply: reply.into(),
            reply_type: ReplyType::Text,
            chat_id: None,
        }
    }

    fn stage(rules: Vec<WordReplyRule>, client: Arc<RecordingChatClient>) -> WordReplyStage {
        let mut s = settings();
        s.word_replies = rules;
        WordReplyStage::new(Arc::new(context_with(
            s,
            client,
            Arc::new(MockTransport::new(vec![])),
            Arc::new(ScriptedDice::always(false)),
        )))
    }

    #[test]
    fn match_types() {
        let s = stage(
            vec![
                rule("hello", MatchType::Full, "full"),
                rule("ell", MatchType::Substr, "substr"),
                rule(r"^h\w+o$", MatchType::Regex, "regex"),
            ],
            Arc::new(RecordingChatClient::new()),
        );
        let replies: Vec<&str> = s.candidates("oc_1", "hello").iter().map(|r| r.reply.as_str()).collect();
        assert_eq!(replies, vec!["full", "substr", "regex"]);
        let replies: Vec<&str> = s.candidates("oc_1", "yellow").iter().map(|r| r.reply.as_str()).collect();
        assert_eq!(replies, vec!["substr"]);
    }

    #[test]
    fn chat_rules_win_over_global() {
        let mut local = rule("hi", MatchType::Full, "local");
        local.chat_id = Some("oc_1".into());
        let s = stage(
            vec![rule("hi", MatchType::Full, "global"), local],
            Arc::new(RecordingChatClient::new()),
        );
        assert_eq!(s.candidates("oc_1", "hi")[0].reply, "local");
        assert_eq!(s.candidates("oc_2", "hi")[0].reply, "global");
    }

    #[test]
    fn invalid_regex_is_dropped() {
        let (logs, _guard) = capture_logs();
        let s = stage(
            vec![rule("(", MatchType::Regex, "x"), rule("ok", MatchType::Full, "y")],
            Arc::new(RecordingChatClient::new()),
        );
        assert_eq!(s.rules.len(), 1);
        assert!(logs.has_event(Level::WARN, "dropping word reply rule"));
    }

    #[tokio::test]
    async fn replies_text_and_media() {
        let client = Arc::new(RecordingChatClient::new());
        let mut img = rule("pic", MatchType::Full, "img_v2_abc");
        img.reply_type = ReplyType::Image;
        let mut sticker = rule("stk", MatchType::Full, "file_v2_abc");
        sticker.reply_type = ReplyType::Image;
        let s = stage(vec![rule("hi", MatchType::Full, "hello"), img, sticker], Arc::clone(&client));
        let cancel = CancellationToken::new();

        for text in ["hi", "pic", "stk", "nothing"] {
            let e = event(text);
            let _ = s.run(&e, &meta_for(&e), &cancel).await;
        }

        assert_eq!(
            client.calls(),
            vec![
                ClientCall::ReplyText {
                    message_id: "om_1".into(),
                    text: "hello".into()
                },
                ClientCall::ReplyContent {
                    message_id: "om_1".into(),
                    msg_type: "image".into(),
                    content: json!({ "image_key": "img_v2_abc" }),
                },
                ClientCall::ReplyContent {
                    message_id: "om_1".into(),
                    msg_type: "sticker".into(),
                    content: json!({ "file_key": "file_v2_abc" }),
                },
            ]
        );
    }

    #[tokio::test]
    async fn skipped_for_commands() {
        let s = stage(vec![rule("/help", MatchType::Full, "x")], Arc::new(RecordingChatClient::new()));
        let e = event("/help");
        assert!(s.pre_run(&e, &meta_for(&e), &CancellationToken::new()).await.is_skip());
    }
}
