use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ids::TraceId;

/// Per-event context built once per pipeline run.
///
/// Stages may mutate it concurrently through [`SharedMetadata`]; defer hooks
/// read the final state. Nothing here outlives the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub chat_id: String,
    pub user_id: String,
    pub is_p2p: bool,
    pub is_command: bool,
    pub main_command: Option<String>,
    /// Set by a stage that already produced the user-visible completion signal.
    pub skip_done: bool,
    pub trace_id: TraceId,
    pub extra: HashMap<String, serde_json::Value>,
}

impl Metadata {
    pub fn new(chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let _ = self.extra.insert(key.into(), value);
    }

    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// Metadata shared between the concurrently running stages of one run.
/// Never hold the lock across an await.
pub type SharedMetadata = Arc<Mutex<Metadata>>;

pub fn shared(meta: Metadata) -> SharedMetadata {
    Arc::new(Mutex::new(meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_identity_and_defaults() {
        let meta = Metadata::new("oc_1", "ou_1");
        assert_eq!(meta.chat_id, "oc_1");
        assert_eq!(meta.user_id, "ou_1");
        assert!(!meta.is_command);
        assert!(!meta.skip_done);
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn extra_bag_roundtrip() {
        let mut meta = Metadata::new("oc_1", "ou_1");
        meta.set_extra("reaction_id", serde_json::json!("r_1"));
        assert_eq!(meta.extra("reaction_id"), Some(&serde_json::json!("r_1")));
        assert!(meta.extra("missing").is_none());
    }

    #[test]
    fn shared_mutation_is_visible() {
        let meta = shared(Metadata::new("oc_1", "ou_1"));
        let other = Arc::clone(&meta);
        other.lock().skip_done = true;
        assert!(meta.lock().skip_done);
    }
}
