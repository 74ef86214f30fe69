use std::collections::VecDeque;

use dashmap::DashMap;

/// Recent message lines per chat, plus the log of messages submitted for
/// topic chunking. Both are bounded; the oldest lines fall off first.
pub struct HistoryBuffer {
    capacity: usize,
    lines: DashMap<String, VecDeque<String>>,
    topics: DashMap<String, VecDeque<String>>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: DashMap::new(),
            topics: DashMap::new(),
        }
    }

    pub fn record(&self, chat_id: &str, line: impl Into<String>) {
        push_bounded(&self.lines, chat_id, line.into(), self.capacity);
    }

    /// Up to `n` most recent lines, oldest first.
    pub fn recent(&self, chat_id: &str, n: usize) -> Vec<String> {
        tail(&self.lines, chat_id, n)
    }

    pub fn submit_topic(&self, chat_id: &str, line: impl Into<String>) {
        push_bounded(&self.topics, chat_id, line.into(), self.capacity);
    }

    pub fn topics(&self, chat_id: &str, n: usize) -> Vec<String> {
        tail(&self.topics, chat_id, n)
    }

    pub fn len(&self, chat_id: &str) -> usize {
        self.lines.get(chat_id).map_or(0, |l| l.len())
    }
}

fn push_bounded(map: &DashMap<String, VecDeque<String>>, chat_id: &str, line: String, capacity: usize) {
    let mut entry = map.entry(chat_id.to_string()).or_default();
    if entry.len() >= capacity {
        let _ = entry.pop_front();
    }
    entry.push_back(line);
}

fn tail(map: &DashMap<String, VecDeque<String>>, chat_id: &str, n: usize) -> Vec<String> {
    let Some(lines) = map.get(chat_id) else {
        return Vec::new();
    };
    let skip = lines.len().saturating_sub(n);
    lines.iter().skip(skip).cloned().collect()
}
