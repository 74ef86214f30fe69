//! Fakes for exercising stages and the chat flow without a gateway.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use relay_core::metadata::shared;
use relay_core::{CardId, ModelTransport, SharedMetadata};
use relay_settings::RelaySettings;

use crate::client::{ChatClient, ChatClientError};
use crate::command::CommandRouter;
use crate::context::BotContext;
use crate::dice::Dice;
use crate::event::{Mention, MessageEvent};
use crate::hooks::build_metadata;

pub const BOT_OPEN_ID: &str = "ou_bot";

#[derive(Clone, Debug, PartialEq)]
pub enum ClientCall {
    ReplyText { message_id: String, text: String },
    ReplyContent { message_id: String, msg_type: String, content: Value },
    CreateMessage { chat_id: String, msg_type: String, content: Value },
    AddReaction { message_id: String, emoji: String },
    RemoveReaction { message_id: String, reaction_id: String },
    CreateCard { chat_id: String },
    UpdateElement { card_id: String, element: String, content: String, sequence: u64 },
    UpdateSettings { card_id: String, settings: Value, sequence: u64 },
}

/// Records every call; optionally fails reactions.
#[derive(Default)]
pub struct RecordingChatClient {
    calls: Mutex<Vec<ClientCall>>,
    next_id: AtomicUsize,
    fail_reactions: AtomicBool,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_reactions() -> Self {
        let client = Self::default();
        client.fail_reactions.store(true, Ordering::SeqCst);
        client
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    /// Texts of every text reply, in order.
    pub fn replies(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClientCall::ReplyText { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Emoji of every added reaction, in order.
    pub fn reactions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClientCall::AddReaction { emoji, .. } => Some(emoji.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ClientCall) -> String {
        self.calls.lock().push(call);
        format!("id_{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn reply_text(&self, message_id: &str, text: &str) -> Result<String, ChatClientError> {
        Ok(self.record(ClientCall::ReplyText {
            message_id: message_id.into(),
            text: text.into(),
        }))
    }

    async fn reply_content(&self, message_id: &str, msg_type: &str, content: &Value) -> Result<String, ChatClientError> {
        Ok(self.record(ClientCall::ReplyContent {
            message_id: message_id.into(),
            msg_type: msg_type.into(),
            content: content.clone(),
        }))
    }

    async fn create_message(&self, chat_id: &str, msg_type: &str, content: &Value) -> Result<String, ChatClientError> {
        Ok(self.record(ClientCall::CreateMessage {
            chat_id: chat_id.into(),
            msg_type: msg_type.into(),
            content: content.clone(),
        }))
    }

    async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<String, ChatClientError> {
        if self.fail_reactions.load(Ordering::SeqCst) {
            return Err(ChatClientError::Api {
                code: 231001,
                message: "reaction type invalid".into(),
            });
        }
        Ok(self.record(ClientCall::AddReaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        }))
    }

    async fn remove_reaction(&self, message_id: &str, reaction_id: &str) -> Result<(), ChatClientError> {
        let _ = self.record(ClientCall::RemoveReaction {
            message_id: message_id.into(),
            reaction_id: reaction_id.into(),
        });
        Ok(())
    }

    async fn create_streaming_card(&self, chat_id: &str) -> Result<CardId, ChatClientError> {
        let id = self.record(ClientCall::CreateCard { chat_id: chat_id.into() });
        Ok(CardId::from_raw(id))
    }

    async fn update_card_element(
        &self,
        card_id: &CardId,
        element: &str,
        content: &str,
        sequence: u64,
    ) -> Result<(), ChatClientError> {
        let _ = self.record(ClientCall::UpdateElement {
            card_id: card_id.to_string(),
            element: element.into(),
            content: content.into(),
            sequence,
        });
        Ok(())
    }

    async fn update_card_settings(&self, card_id: &CardId, settings: &Value, sequence: u64) -> Result<(), ChatClientError> {
        let _ = self.record(ClientCall::UpdateSettings {
            card_id: card_id.to_string(),
            settings: settings.clone(),
            sequence,
        });
        Ok(())
    }
}

/// Plays back scripted `chance` outcomes, then falls back to a fixed answer.
pub struct ScriptedDice {
    chances: Mutex<VecDeque<bool>>,
    fallback: bool,
    index: usize,
}

impl ScriptedDice {
    pub fn new(chances: Vec<bool>, fallback: bool) -> Self {
        Self {
            chances: Mutex::new(chances.into()),
            fallback,
            index: 0,
        }
    }

    pub fn always(hit: bool) -> Self {
        Self::new(Vec::new(), hit)
    }

    #[must_use]
    pub fn picking(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

impl Dice for ScriptedDice {
    fn chance(&self, _percent: u8) -> bool {
        self.chances.lock().pop_front().unwrap_or(self.fallback)
    }

    fn pick(&self, len: usize) -> usize {
        self.index.min(len.saturating_sub(1))
    }
}

pub fn settings() -> RelaySettings {
    let mut settings = RelaySettings::default();
    settings.bot.bot_open_id = BOT_OPEN_ID.into();
    settings.model.normal_model = "normal-model".into();
    settings.model.reasoning_model = "reasoning-model".into();
    settings
}

/// Context with a dice that never fires.
pub fn context(client: Arc<dyn ChatClient>, transport: Arc<dyn ModelTransport>) -> BotContext {
    context_with(settings(), client, transport, Arc::new(ScriptedDice::always(false)))
}

pub fn context_with(
    settings: RelaySettings,
    client: Arc<dyn ChatClient>,
    transport: Arc<dyn ModelTransport>,
    dice: Arc<dyn Dice>,
) -> BotContext {
    BotContext::new(settings, client, transport, dice)
}

/// Group text message in `oc_1` from `ou_sender`. `@_user_1` mentions the bot.
pub fn event(text: &str) -> MessageEvent {
    MessageEvent {
        message_id: "om_1".into(),
        chat_id: "oc_1".into(),
        chat_type: "group".into(),
        sender_id: "ou_sender".into(),
        message_type: "text".into(),
        text: text.into(),
        mentions: vec![Mention {
            key: "@_user_1".into(),
            open_id: BOT_OPEN_ID.into(),
            name: "relay".into(),
        }],
        create_time: 1_700_000_000_000,
        content: json!({ "text": text }),
        image_urls: Vec::new(),
    }
}

/// Metadata for `event` as the pipeline would build it.
pub fn meta_for(event: &MessageEvent) -> SharedMetadata {
    shared(build_metadata(&CommandRouter::new(), event))
}
