use dashmap::DashMap;
use serde_json::{json, Value};

/// Media the bot has seen in a chat and may send back as a reaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Material {
    Sticker(String),
    Image(String),
}

impl Material {
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::Sticker(_) => "sticker",
            Self::Image(_) => "image",
        }
    }

    pub fn content(&self) -> Value {
        match self {
            Self::Sticker(key) => json!({ "file_key": key }),
            Self::Image(key) => json!({ "image_key": key }),
        }
    }
}

/// Per-chat set of remembered stickers and images.
#[derive(Default)]
pub struct ReactionMaterials {
    by_chat: DashMap<String, Vec<Material>>,
}

impl ReactionMaterials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the material was already known.
    pub fn remember(&self, chat_id: &str, material: Material) -> bool {
        let mut entry = self.by_chat.entry(chat_id.to_string()).or_default();
        if entry.contains(&material) {
            return false;
        }
        entry.push(material);
        true
    }

    pub fn list(&self, chat_id: &str) -> Vec<Material> {
        self.by_chat.get(chat_id).map(|m| m.clone()).unwrap_or_default()
    }
}
