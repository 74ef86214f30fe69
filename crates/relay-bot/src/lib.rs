//! The chat bot: inbound message model, stages, hooks, commands and the
//! model-backed chat flow.

pub mod chat_flow;
pub mod client;
pub mod command;
pub mod content;
pub mod context;
pub mod dice;
pub mod error;
pub mod event;
pub mod history;
pub mod hooks;
pub mod materials;
pub mod mentions;
pub mod mute;
pub mod pipeline;
pub mod stages;
pub mod tools;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{ChatClient, ChatClientError, HttpChatClient};
pub use command::{Command, CommandRouter};
pub use context::BotContext;
pub use dice::{Dice, RandomDice};
pub use error::{ChatError, CommandError};
pub use event::{Mention, MessageEvent};
pub use pipeline::build_pipeline;
