use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_engine::repair::decode_structured;

/// The JSON object the chat model is prompted to answer with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentStruct {
    /// `reply` or `skip`.
    pub decision: String,
    pub thought: String,
    pub reply: String,
    pub reference_from_web: String,
    pub reference_from_history: String,
}

impl ContentStruct {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_skip(&self) -> bool {
        self.decision.trim().eq_ignore_ascii_case("skip")
    }

    /// Reply text with literal `\n` sequences turned into newlines.
    pub fn reply_text(&self) -> String {
        self.reply.replace("\\n", "\n")
    }

    /// Markdown list of the non-empty fields, as shown on the streaming card.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (label, value) in [
            ("决策", &self.decision),
            ("思考", &self.thought),
            ("回复", &self.reply),
            ("参考网络", &self.reference_from_web),
            ("参考历史", &self.reference_from_history),
        ] {
            if !value.is_empty() {
                out.push_str("- ");
                out.push_str(label);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

/// Render possibly incomplete model output for display. Falls back to the raw
/// text when it cannot be read as a [`ContentStruct`].
pub fn render_content(raw: &str) -> String {
    decode_structured(raw)
        .as_ref()
        .and_then(ContentStruct::from_value)
        .map(|c| c.render())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| raw.to_string())
}

/// Prefix every line with `> ` so reasoning shows as a quote block.
pub fn quote_reasoning(reasoning: &str) -> String {
    reasoning
        .split('\n')
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
