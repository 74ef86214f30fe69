//! Turns plain names and open ids in model replies into `<at>` tags.

use std::collections::BTreeMap;

use aho_corasick::{AhoCorasick, MatchKind};
use tracing::warn;

use crate::event::{at_user, MessageEvent};

/// Rewrites every known name or open id to an `<at>` tag, preferring the
/// longest match where names overlap.
pub struct MentionRewriter {
    matcher: Option<AhoCorasick>,
    replacements: Vec<String>,
}

impl MentionRewriter {
    /// Build from `(open_id, name)` pairs. Empty names and ids are ignored.
    pub fn new<'a>(people: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut tags: BTreeMap<&str, String> = BTreeMap::new();
        for (open_id, name) in people {
            if open_id.is_empty() {
                continue;
            }
            let tag = at_user(open_id, name);
            if !name.is_empty() {
                tags.insert(name, tag.clone());
            }
            tags.insert(open_id, tag);
        }

        if tags.is_empty() {
            return Self { matcher: None, replacements: Vec::new() };
        }
        let (patterns, replacements): (Vec<&str>, Vec<String>) = tags.into_iter().unzip();
        match AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
        {
            Ok(matcher) => Self { matcher: Some(matcher), replacements },
            Err(e) => {
                warn!(error = %e, "mention matcher unavailable, replies stay plain");
                Self { matcher: None, replacements: Vec::new() }
            }
        }
    }

    /// People mentioned in `event`, except the bot itself.
    pub fn for_event(event: &MessageEvent, bot_open_id: &str) -> Self {
        Self::new(
            event
                .mentions
                .iter()
                .filter(|m| m.open_id != bot_open_id)
                .map(|m| (m.open_id.as_str(), m.name.as_str())),
        )
    }

    pub fn rewrite(&self, text: &str) -> String {
        match &self.matcher {
            Some(matcher) => matcher.replace_all(text, &self.replacements),
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Mention;
    use crate::testing::{event, BOT_OPEN_ID};

    #[test]
    fn names_and_ids_become_tags() {
        let rewriter = MentionRewriter::new([("ou_a", "Alice"), ("ou_b", "Bob")]);
        assert_eq!(
            rewriter.rewrite("Alice, ask ou_b"),
            r#"<at user_id="ou_a">Alice</at>, ask <at user_id="ou_b">Bob</at>"#
        );
    }

    #[test]
    fn longest_name_wins() {
        let rewriter = MentionRewriter::new([("ou_a", "Al"), ("ou_b", "Alice")]);
        assert_eq!(rewriter.rewrite("Alice"), r#"<at user_id="ou_b">Alice</at>"#);
        assert_eq!(rewriter.rewrite("Al!"), r#"<at user_id="ou_a">Al</at>!"#);
    }

    #[test]
    fn nobody_known_leaves_text_alone() {
        let rewriter = MentionRewriter::new([("", "ghost")]);
        assert_eq!(rewriter.rewrite("ghost"), "ghost");
    }

    #[test]
    fn event_mentions_skip_the_bot() {
        let mut e = event("@_user_1 @_user_2 hi");
        e.mentions.push(Mention {
            key: "@_user_2".into(),
            open_id: "ou_carol".into(),
            name: "Carol".into(),
        });
        let bot_name = e.mentions[0].name.clone();
        assert_eq!(e.mentions[0].open_id, BOT_OPEN_ID);

        let rewriter = MentionRewriter::for_event(&e, BOT_OPEN_ID);
        let text = format!("Carol meet {bot_name}");
        assert_eq!(
            rewriter.rewrite(&text),
            format!(r#"<at user_id="ou_carol">Carol</at> meet {bot_name}"#)
        );
    }
}
