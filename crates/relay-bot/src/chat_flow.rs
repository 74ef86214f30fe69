//! One model-backed reply to a message.
//!
//! Normal mode waits for the final structured answer and replies with its
//! `reply` field. Reasoning mode streams reasoning and content into a card
//! through a [`Coalescer`], then switches the card's streaming mode off.
//! Either way, names of people mentioned in the message are turned into
//! `<at>` tags in the final reply.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use relay_core::{CardId, SharedMetadata, TurnMeta, TurnOptions, TurnRequest};
use relay_engine::{Coalescer, PartialResult, SinkError, UpdateSink};

use crate::client::ChatClient;
use crate::content::{quote_reasoning, render_content, ContentStruct};
use crate::context::BotContext;
use crate::error::ChatError;
use crate::event::{display_time, MessageEvent};
use crate::mentions::MentionRewriter;

pub const CONTENT_ELEMENT: &str = "content";
pub const REASONING_ELEMENT: &str = "cot";

/// Flags and free text taken from a chat invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// `-r`: use the reasoning model and stream into a card.
    pub reasoning: bool,
    /// `-c`: leave chat history out of the prompt.
    pub no_context: bool,
    pub input: String,
}

impl ChatArgs {
    pub fn parse(raw: &str) -> Self {
        let mut args = Self::default();
        let mut words = Vec::new();
        for token in raw.split_whitespace() {
            match token {
                "-r" => args.reasoning = true,
                "-c" => args.no_context = true,
                other => words.push(other),
            }
        }
        args.input = words.join(" ");
        args
    }
}

/// Run the chat flow for `event`. Always marks the run as having produced its
/// own completion signal, whatever the outcome.
pub async fn run_chat(
    ctx: &BotContext,
    event: &MessageEvent,
    meta: &SharedMetadata,
    raw_args: &str,
    cancel: &CancellationToken,
) -> Result<(), ChatError> {
    let result = chat(ctx, event, meta, raw_args, cancel).await;
    meta.lock().skip_done = true;
    result
}

#[instrument(skip_all, fields(chat_id = %event.chat_id, message_id = %event.message_id))]
async fn chat(
    ctx: &BotContext,
    event: &MessageEvent,
    meta: &SharedMetadata,
    raw_args: &str,
    cancel: &CancellationToken,
) -> Result<(), ChatError> {
    if !ctx.is_mentioned(event) && ctx.mutes.is_muted(&event.chat_id) {
        debug!("chat is muted");
        return Ok(());
    }

    let args = ChatArgs::parse(raw_args);
    let request = build_request(ctx, event, &args);
    let trace_id = meta.lock().trace_id.clone();
    let turn_meta = TurnMeta::new(&event.chat_id, &event.sender_id, trace_id).with_cancel(cancel.clone());

    if args.reasoning {
        stream_to_card(ctx, event, request, turn_meta).await
    } else {
        reply_once(ctx, event, request, turn_meta).await
    }
}

/// Assemble the turn request: system prompt, recent history, the user line.
pub fn build_request(ctx: &BotContext, event: &MessageEvent, args: &ChatArgs) -> TurnRequest {
    let settings = &ctx.settings.model;
    let history_size = if args.no_context { 0 } else { settings.history_size };
    let history = ctx.history.recent(&event.chat_id, history_size);

    let text = if args.input.is_empty() {
        event.trimmed_text()
    } else {
        args.input.clone()
    };
    let user_line = format!("[{}]({}) : {}", display_time(event.create_time), event.sender_id, text);

    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("Recent messages:\n");
        prompt.push_str(&history.join("\n"));
        prompt.push_str("\n\n");
    }
    prompt.push_str("Current message:\n");
    prompt.push_str(&user_line);

    TurnRequest {
        model: if args.reasoning {
            settings.reasoning_model.clone()
        } else {
            settings.normal_model.clone()
        },
        system_prompt: settings.system_prompt.clone(),
        user_prompt: prompt,
        image_urls: event.image_urls.clone(),
        tools: ctx.engine.tool_definitions(),
        options: TurnOptions {
            temperature: Some(settings.temperature),
            json_output: settings.json_output,
            store: true,
        },
    }
}

async fn reply_once(
    ctx: &BotContext,
    event: &MessageEvent,
    request: TurnRequest,
    turn_meta: TurnMeta,
) -> Result<(), ChatError> {
    let result = ctx.engine.complete(request, turn_meta).await?;

    let text = match result.structured.as_ref().and_then(ContentStruct::from_value) {
        Some(content) if content.is_skip() => {
            debug!(thought = %content.thought, "model chose not to reply");
            return Ok(());
        }
        Some(content) => content.reply_text(),
        None => result.content.trim().to_string(),
    };
    let text = MentionRewriter::for_event(event, &ctx.settings.bot.bot_open_id).rewrite(&text);

    if text.trim().is_empty() {
        warn!("model produced an empty reply");
        return Ok(());
    }
    let _ = ctx.client.reply_text(&event.message_id, &text).await?;
    Ok(())
}

async fn stream_to_card(
    ctx: &BotContext,
    event: &MessageEvent,
    request: TurnRequest,
    turn_meta: TurnMeta,
) -> Result<(), ChatError> {
    let card_id = ctx.client.create_streaming_card(&event.chat_id).await?;
    let sink = Arc::new(CardSink {
        client: Arc::clone(&ctx.client),
        card_id: card_id.clone(),
    });
    let coalescer = Coalescer::spawn(sink, ctx.coalescer_config());

    let mentions = MentionRewriter::for_event(event, &ctx.settings.bot.bot_open_id);
    let streamed = feed_card(ctx, request, turn_meta, &coalescer, &mentions).await;
    let last_sequence = coalescer.close().await;

    let settings = json!({ "config": { "streaming_mode": false } });
    ctx.client
        .update_card_settings(&card_id, &settings, last_sequence + 1)
        .await?;
    streamed
}

async fn feed_card(
    ctx: &BotContext,
    request: TurnRequest,
    turn_meta: TurnMeta,
    coalescer: &Coalescer,
    mentions: &MentionRewriter,
) -> Result<(), ChatError> {
    let mut stream = ctx.engine.start(request, turn_meta).await?;
    let mut content_len = 0;
    let mut reasoning_len = 0;

    while let Some(item) = stream.next().await {
        let partial = item?;

        if partial.content.len() != content_len || (partial.is_final && !partial.content.is_empty()) {
            content_len = partial.content.len();
            let rendered = if partial.is_final {
                render_final(&partial, mentions)
            } else {
                render_content(&partial.content)
            };
            if coalescer
                .submit(CONTENT_ELEMENT, rendered)
                .await
                .is_err()
            {
                warn!("card coalescer stopped early");
                break;
            }
        }
        if partial.reasoning.len() != reasoning_len {
            reasoning_len = partial.reasoning.len();
            if coalescer
                .submit(REASONING_ELEMENT, quote_reasoning(&partial.reasoning))
                .await
                .is_err()
            {
                warn!("card coalescer stopped early");
                break;
            }
        }
    }
    Ok(())
}

/// Final card content, with mentions in the reply resolved.
fn render_final(partial: &PartialResult, mentions: &MentionRewriter) -> String {
    match partial.structured.as_ref().and_then(ContentStruct::from_value) {
        Some(mut content) => {
            content.reply = mentions.rewrite(&content.reply);
            let rendered = content.render();
            if rendered.is_empty() {
                partial.content.clone()
            } else {
                rendered
            }
        }
        None => render_content(&partial.content),
    }
}

/// Writes coalesced updates into one card element per channel.
struct CardSink {
    client: Arc<dyn ChatClient>,
    card_id: CardId,
}

#[async_trait]
impl UpdateSink for CardSink {
    async fn apply_update(&self, channel: &str, content: &str, sequence: u64) -> Result<(), SinkError> {
        self.client
            .update_card_element(&self.card_id, channel, content, sequence)
            .await
            .map_err(|e| SinkError::Rejected(e.to_string()))
    }
}
