//! Settings types. Every section has compiled defaults so a partial (or
//! missing) settings file is always valid.

use std::collections::HashMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub bot: BotSettings,
    pub model: ModelSettings,
    pub rates: RateSettings,
    pub streaming: StreamingSettings,
    pub telemetry: TelemetrySettings,
    pub word_replies: Vec<WordReplyRule>,
    pub chat_gateway: ChatGatewaySettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Inbound events older than this are dropped.
    pub stale_after_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9091,
            stale_after_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub robot_name: String,
    /// Open id of the bot account; its own messages are ignored.
    pub bot_open_id: String,
    pub default_mute_minutes: u64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            robot_name: "relay".into(),
            bot_open_id: String::new(),
            default_mute_minutes: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
    pub normal_model: String,
    pub reasoning_model: String,
    pub temperature: f64,
    pub json_output: bool,
    /// Recent chat lines included in the prompt.
    pub history_size: usize,
    pub system_prompt: String,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://ark.cn-beijing.volces.com/api/v3".into(),
            api_key: None,
            normal_model: String::new(),
            reasoning_model: String::new(),
            temperature: 0.1,
            json_output: true,
            history_size: 20,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            connect_timeout_secs: 30,
            idle_timeout_secs: 90,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a member of a group chat. \
Answer with a JSON object with the keys decision, thought, reply, \
reference_from_web and reference_from_history. Set decision to \"skip\" \
when the message needs no answer.";

/// Probabilities in percent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub reaction_default_rate: u8,
    pub repeat_default_rate: u8,
    pub imitate_default_rate: u8,
    /// Word → repeat rate, overriding the default for exact message matches.
    pub repeat_word_rates: HashMap<String, u8>,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            reaction_default_rate: 10,
            repeat_default_rate: 10,
            imitate_default_rate: 5,
            repeat_word_rates: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub flush_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: 20,
            channel_capacity: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub module_levels: HashMap<String, String>,
    pub grafana_url: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json: false,
            module_levels: HashMap::new(),
            grafana_url: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Full,
    Substr,
    Regex,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyType {
    #[default]
    Text,
    /// An image key (`img_...`) or a sticker file key.
    Image,
}

/// Keyword auto-reply rule. Rules with a `chat_id` apply only to that chat and
/// take precedence over global rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordReplyRule {
    pub keyword: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub reply: String,
    #[serde(default)]
    pub reply_type: ReplyType,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatGatewaySettings {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub token: Option<SecretString>,
    pub timeout_secs: u64,
}

impl Default for ChatGatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9300".into(),
            token: None,
            timeout_secs: 15,
        }
    }
}
