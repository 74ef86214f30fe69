//! Outbound chat platform operations.
//!
//! The bot never talks to the chat platform directly; a gateway exposes the
//! handful of calls the stages need as a small JSON API. Every response is
//! wrapped in `{"code": 0, "msg": "", "data": {...}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use relay_core::CardId;
use relay_settings::ChatGatewaySettings;

#[derive(Debug, thiserror::Error)]
pub enum ChatClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

/// Message operations used by the bot's stages.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Reply to `message_id` with plain text. Returns the new message id.
    async fn reply_text(&self, message_id: &str, text: &str) -> Result<String, ChatClientError>;

    /// Reply with raw content of the given message type (`image`, `sticker`, ...).
    async fn reply_content(&self, message_id: &str, msg_type: &str, content: &Value) -> Result<String, ChatClientError>;

    /// Post a new message to a chat.
    async fn create_message(&self, chat_id: &str, msg_type: &str, content: &Value) -> Result<String, ChatClientError>;

    /// Returns the reaction id needed to remove it again.
    async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<String, ChatClientError>;

    async fn remove_reaction(&self, message_id: &str, reaction_id: &str) -> Result<(), ChatClientError>;

    /// Create a streaming card and post it into the chat.
    async fn create_streaming_card(&self, chat_id: &str) -> Result<CardId, ChatClientError>;

    async fn update_card_element(
        &self,
        card_id: &CardId,
        element: &str,
        content: &str,
        sequence: u64,
    ) -> Result<(), ChatClientError>;

    async fn update_card_settings(&self, card_id: &CardId, settings: &Value, sequence: u64) -> Result<(), ChatClientError>;
}

/// Text message content as the platform expects it.
pub fn text_content(text: &str) -> Value {
    json!({ "text": text })
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

/// [`ChatClient`] backed by the HTTP gateway.
pub struct HttpChatClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpChatClient {
    pub fn new(settings: &ChatGatewaySettings) -> Result<Self, ChatClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ChatClientError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ChatClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(|e| ChatClientError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await.map_err(|e| ChatClientError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let envelope: Envelope = serde_json::from_str(&text).map_err(|e| ChatClientError::Decode(e.to_string()))?;
        if envelope.code != 0 {
            return Err(ChatClientError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }
}

fn data_str(data: &Value, key: &str) -> Result<String, ChatClientError> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ChatClientError::Decode(format!("missing `{key}` in response")))
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn reply_text(&self, message_id: &str, text: &str) -> Result<String, ChatClientError> {
        self.reply_content(message_id, "text", &text_content(text)).await
    }

    #[instrument(skip_all, fields(message_id = %message_id, msg_type = %msg_type))]
    async fn reply_content(&self, message_id: &str, msg_type: &str, content: &Value) -> Result<String, ChatClientError> {
        let body = json!({ "msg_type": msg_type, "content": content.to_string() });
        let data = self
            .call(Method::POST, &format!("/messages/{message_id}/reply"), Some(body))
            .await?;
        data_str(&data, "message_id")
    }

    #[instrument(skip_all, fields(chat_id = %chat_id, msg_type = %msg_type))]
    async fn create_message(&self, chat_id: &str, msg_type: &str, content: &Value) -> Result<String, ChatClientError> {
        let body = json!({ "chat_id": chat_id, "msg_type": msg_type, "content": content.to_string() });
        let data = self.call(Method::POST, "/messages", Some(body)).await?;
        data_str(&data, "message_id")
    }

    async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<String, ChatClientError> {
        let data = self
            .call(
                Method::POST,
                &format!("/messages/{message_id}/reactions"),
                Some(json!({ "emoji_type": emoji })),
            )
            .await?;
        data_str(&data, "reaction_id")
    }

    async fn remove_reaction(&self, message_id: &str, reaction_id: &str) -> Result<(), ChatClientError> {
        let _ = self
            .call(Method::DELETE, &format!("/messages/{message_id}/reactions/{reaction_id}"), None)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(chat_id = %chat_id))]
    async fn create_streaming_card(&self, chat_id: &str) -> Result<CardId, ChatClientError> {
        let data = self
            .call(Method::POST, "/cards", Some(json!({ "chat_id": chat_id, "streaming": true })))
            .await?;
        let card_id = data_str(&data, "card_id")?;
        debug!(card_id = %card_id, "streaming card created");
        Ok(CardId::from_raw(card_id))
    }

    async fn update_card_element(
        &self,
        card_id: &CardId,
        element: &str,
        content: &str,
        sequence: u64,
    ) -> Result<(), ChatClientError> {
        let _ = self
            .call(
                Method::PUT,
                &format!("/cards/{card_id}/elements/{element}"),
                Some(json!({ "content": content, "sequence": sequence })),
            )
            .await?;
        Ok(())
    }

    async fn update_card_settings(&self, card_id: &CardId, settings: &Value, sequence: u64) -> Result<(), ChatClientError> {
        let _ = self
            .call(
                Method::PATCH,
                &format!("/cards/{card_id}/settings"),
                Some(json!({ "settings": settings.to_string(), "sequence": sequence })),
            )
            .await?;
        Ok(())
    }
}
