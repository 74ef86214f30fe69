use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use relay_core::SharedMetadata;

use crate::chat_flow;
use crate::context::BotContext;
use crate::error::CommandError;
use crate::event::MessageEvent;

const COMMAND_PREFIX: char = '/';

/// A parsed slash command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Mute { minutes: Option<u64> },
    Unmute,
    Chat { args: String },
    Trace,
}

/// Recognizes and executes slash commands.
#[derive(Clone, Debug, Default)]
pub struct CommandRouter;

impl CommandRouter {
    pub fn new() -> Self {
        Self
    }

    /// `text` should already have mention placeholders removed.
    pub fn is_command(&self, text: &str) -> bool {
        text.trim_start().starts_with(COMMAND_PREFIX)
    }

    /// Lower-cased command name without the prefix.
    pub fn main_command(&self, text: &str) -> Option<String> {
        let first = normalize(text).split_whitespace().next()?.to_string();
        first
            .strip_prefix(COMMAND_PREFIX)
            .map(|name| name.to_lowercase())
    }

    pub fn parse(&self, text: &str) -> Result<Command, CommandError> {
        let normalized = normalize(text);
        let mut tokens = normalized.split_whitespace();
        let name = tokens
            .next()
            .and_then(|t| t.strip_prefix(COMMAND_PREFIX))
            .map(str::to_lowercase)
            .ok_or_else(|| CommandError::NotFound(text.trim().to_string()))?;

        match name.as_str() {
            "help" => Ok(Command::Help),
            "mute" => {
                let minutes = tokens
                    .next()
                    .map(|m| {
                        m.parse::<u64>()
                            .ok()
                            .filter(|m| *m > 0)
                            .ok_or_else(|| CommandError::InvalidArgs {
                                command: name.clone(),
                                reason: format!("`{m}` is not a positive number of minutes"),
                            })
                    })
                    .transpose()?;
                Ok(Command::Mute { minutes })
            }
            "unmute" => Ok(Command::Unmute),
            "chat" => Ok(Command::Chat {
                args: tokens.collect::<Vec<_>>().join(" "),
            }),
            "trace" => Ok(Command::Trace),
            _ => Err(CommandError::NotFound(name)),
        }
    }

    pub fn help_text(&self) -> String {
        [
            "/help - show this message",
            "/mute [minutes] - stop unsolicited replies in this chat",
            "/unmute - lift a mute",
            "/chat [-r] [-c] <text> - talk to the model (-r: reasoning, -c: no history)",
            "/trace - link to the trace of this message",
        ]
        .join("\n")
    }

    #[instrument(skip_all, fields(chat_id = %event.chat_id, message_id = %event.message_id))]
    pub async fn execute(
        &self,
        ctx: &BotContext,
        event: &MessageEvent,
        meta: &SharedMetadata,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let command = self.parse(&event.trimmed_text())?;
        debug!(command = ?command, "executing command");

        match command {
            Command::Help => {
                let _ = ctx.client.reply_text(&event.message_id, &self.help_text()).await?;
            }
            Command::Mute { minutes } => {
                let minutes = minutes.unwrap_or(ctx.settings.bot.default_mute_minutes);
                ctx.mutes.mute(&event.chat_id, Duration::from_secs(minutes * 60));
                let _ = ctx
                    .client
                    .reply_text(&event.message_id, &format!("Muted for {minutes} minutes."))
                    .await?;
            }
            Command::Unmute => {
                let text = if ctx.mutes.unmute(&event.chat_id) {
                    "Unmuted."
                } else {
                    "This chat was not muted."
                };
                let _ = ctx.client.reply_text(&event.message_id, text).await?;
            }
            Command::Chat { args } => {
                chat_flow::run_chat(ctx, event, meta, &args, cancel).await?;
            }
            Command::Trace => {
                let trace_id = meta.lock().trace_id.clone();
                let _ = ctx
                    .client
                    .reply_text(&event.message_id, &ctx.linker.markdown(&trace_id))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Some clients wrap the command word in bold tags.
fn normalize(text: &str) -> String {
    text.replace("<b>", " ").replace("</b>", " ")
}
