use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamps in history lines and prompts are shown in UTC+8.
const DISPLAY_OFFSET_SECS: i32 = 8 * 3600;

/// A user mention inside a message. `key` is the placeholder in the text,
/// e.g. `@_user_1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub key: String,
    pub open_id: String,
    #[serde(default)]
    pub name: String,
}

/// Inbound chat message as delivered by the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: String,
    pub chat_id: String,
    /// `p2p` or `group`.
    pub chat_type: String,
    pub sender_id: String,
    /// `text`, `image`, `sticker`, `post`, ...
    pub message_type: String,
    /// Plain text of the message, mention placeholders included.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    /// Milliseconds since the epoch.
    pub create_time: i64,
    /// Raw content JSON as the platform sent it.
    #[serde(default)]
    pub content: Value,
    /// Downloadable image URLs resolved by the gateway.
    #[serde(default)]
    pub image_urls: Vec<String>,
}

impl MessageEvent {
    pub fn is_p2p(&self) -> bool {
        self.chat_type == "p2p"
    }

    pub fn mentions_user(&self, open_id: &str) -> bool {
        !open_id.is_empty() && self.mentions.iter().any(|m| m.open_id == open_id)
    }

    /// Text with mention placeholders removed and whitespace collapsed.
    pub fn trimmed_text(&self) -> String {
        let mut text = self.text.clone();
        for mention in &self.mentions {
            text = text.replace(&mention.key, " ");
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Text with mention placeholders turned back into `<at>` tags, suitable
    /// for re-sending.
    pub fn text_with_at_tags(&self) -> String {
        let mut text = self.text.clone();
        for mention in &self.mentions {
            text = text.replace(&mention.key, &at_user(&mention.open_id, &mention.name));
        }
        text
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.create_time).single()
    }

    /// Milliseconds between creation and `now_ms`; negative for clock skew.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.create_time
    }

    /// `content.file_key` of a sticker message.
    pub fn sticker_key(&self) -> Option<&str> {
        if self.message_type != "sticker" {
            return None;
        }
        self.content.get("file_key").and_then(Value::as_str)
    }

    /// `content.image_key` of an image message.
    pub fn image_key(&self) -> Option<&str> {
        if self.message_type != "image" {
            return None;
        }
        self.content.get("image_key").and_then(Value::as_str)
    }

    /// One line of chat history: `[time](user) : text`. Messages without text
    /// show their type, e.g. `[sticker]`.
    pub fn history_line(&self) -> String {
        let text = self.trimmed_text();
        let text = if text.is_empty() {
            format!("[{}]", self.message_type)
        } else {
            text
        };
        format!("[{}]({}) : {}", display_time(self.create_time), self.sender_id, text)
    }
}

pub fn at_user(open_id: &str, name: &str) -> String {
    format!("<at user_id=\"{open_id}\">{name}</at>")
}

/// `YYYY-MM-DD HH:MM:SS` in UTC+8, or the raw number if out of range.
pub fn display_time(epoch_ms: i64) -> String {
    let Some(offset) = FixedOffset::east_opt(DISPLAY_OFFSET_SECS) else {
        return epoch_ms.to_string();
    };
    match offset.timestamp_millis_opt(epoch_ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch_ms.to_string(),
    }
}
