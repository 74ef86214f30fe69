use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Chats where unsolicited output is muted, each until a deadline.
#[derive(Default)]
pub struct MuteRegistry {
    until: DashMap<String, Instant>,
}

impl MuteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mute(&self, chat_id: &str, duration: Duration) {
        let _ = self.until.insert(chat_id.to_string(), Instant::now() + duration);
    }

    /// Returns whether the chat was muted.
    pub fn unmute(&self, chat_id: &str) -> bool {
        self.until.remove(chat_id).is_some()
    }

    pub fn is_muted(&self, chat_id: &str) -> bool {
        let expired = match self.until.get(chat_id) {
            Some(deadline) => *deadline <= Instant::now(),
            None => return false,
        };
        if expired {
            let _ = self.until.remove(chat_id);
        }
        !expired
    }

    pub fn remaining(&self, chat_id: &str) -> Option<Duration> {
        self.until
            .get(chat_id)
            .map(|d| d.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }
}
