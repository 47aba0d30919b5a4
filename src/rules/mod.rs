//! The rule evaluator: an opaque collaborator that evaluates the
//! user-authored rules script and exposes `block_rule`/`keep_rule`/`format`
//! as plain Rust calls. The Decider and Renderer never see the scripting
//! engine's value types — only [`RuleSet`], [`crate::model::Item`], and
//! [`FormattedMessage`].

mod lua;

pub use lua::LuaRuleSet;

use crate::model::{FeedConfig, Item};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("script evaluation failed: {0}")]
    Eval(String),

    #[error("duplicate feed url: {0}")]
    DuplicateUrl(String),

    #[error("invalid feed url {url:?}: {source}")]
    InvalidUrl { url: String, source: url::ParseError },

    #[error("format() for feed {url:?} failed dry-run validation: {reason}")]
    InvalidFormatter { url: String, reason: String },
}

/// Either a plain-string body, or a body plus an inline-keyboard layout.
/// Decoded from whatever the script's `format` function returned.
#[derive(Debug, Clone, PartialEq)]
pub enum FormattedMessage {
    Body(String),
    WithKeyboard(String, crate::model::Keyboard),
}

impl FormattedMessage {
    pub fn body(&self) -> &str {
        match self {
            FormattedMessage::Body(b) => b,
            FormattedMessage::WithKeyboard(b, _) => b,
        }
    }

    pub fn keyboard(&self) -> Option<&crate::model::Keyboard> {
        match self {
            FormattedMessage::Body(_) => None,
            FormattedMessage::WithKeyboard(_, kb) => Some(kb),
        }
    }
}

/// Validates a decoded `format()` return value per the renderer's
/// accepted-shapes contract: a non-empty body; keyboard rows/buttons with
/// non-empty `text`/`url`; empty rows and buttons are dropped rather than
/// rejected.
pub fn validate_formatted_message(msg: FormattedMessage) -> Result<FormattedMessage, String> {
    match msg {
        FormattedMessage::Body(body) => {
            if body.trim().is_empty() {
                return Err("empty body".to_string());
            }
            Ok(FormattedMessage::Body(body))
        }
        FormattedMessage::WithKeyboard(body, keyboard) => {
            if body.trim().is_empty() {
                return Err("empty body".to_string());
            }
            let cleaned: crate::model::Keyboard = keyboard
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .filter(|b| !b.text.trim().is_empty() && !b.url.trim().is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|row: &Vec<_>| !row.is_empty())
                .collect();
            Ok(FormattedMessage::WithKeyboard(body, cleaned))
        }
    }
}

/// Abstract capability the config script exposes. `block`/`keep` fold any
/// raise or non-boolean return to `false` (per the item-decision algorithm's
/// predicate-error disposition: a failed predicate is never treated as
/// "true"); `format` folds any raise or invalid shape to `None`, logging a
/// structured warning at the call site.
pub trait RuleSet: Send + Sync {
    fn feeds(&self) -> &[FeedConfig];

    fn block(&self, feed: &FeedConfig, item: &Item) -> bool;
    fn keep(&self, feed: &FeedConfig, item: &Item) -> bool;
    fn format(&self, feed: &FeedConfig, items: &[Item], default_title: &str) -> Option<FormattedMessage>;
}

/// Rejects duplicate URLs and URLs that don't parse — the load-time half of
/// config validation; run by [`LuaRuleSet::load`] after accumulating
/// `feed()` calls.
pub fn validate_feed_urls(feeds: &[FeedConfig]) -> Result<(), RuleError> {
    let mut seen = std::collections::HashSet::new();
    for feed in feeds {
        if feed.url.starts_with("tgfeed://") {
            // Synthetic adapter scheme; url::Url parses it fine as an
            // opaque non-hierarchical URL, so no special case is needed
            // beyond allowing it through.
        }
        url::Url::parse(&feed.url).map_err(|source| RuleError::InvalidUrl {
            url: feed.url.clone(),
            source,
        })?;
        if !seen.insert(feed.url.clone()) {
            return Err(RuleError::DuplicateUrl(feed.url.clone()));
        }
    }
    Ok(())
}

/// A synthetic item used for the `format()` dry-run at load time.
pub fn sample_item() -> Item {
    Item {
        title: Some("Sample item".to_string()),
        link: Some("https://example.com/sample".to_string()),
        description: Some("A sample description used for format() validation.".to_string()),
        content: None,
        categories: vec!["sample".to_string()],
        guid: Some("sample-guid".to_string()),
        published: Some(chrono::Utc::now()),
        extensions: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(url: &str) -> FeedConfig {
        FeedConfig {
            url: url.to_string(),
            title: None,
            topic: None,
            has_block_rule: false,
            has_keep_rule: false,
            has_format: false,
            digest: false,
            always_send_new_items: false,
            github_pr_author_denylist: Vec::new(),
        }
    }

    #[test]
    fn rejects_duplicate_urls() {
        let feeds = vec![feed("https://a.com/feed"), feed("https://a.com/feed")];
        assert!(matches!(
            validate_feed_urls(&feeds),
            Err(RuleError::DuplicateUrl(_))
        ));
    }

    #[test]
    fn accepts_tgfeed_scheme() {
        let feeds = vec![feed("tgfeed://github-notifications")];
        assert!(validate_feed_urls(&feeds).is_ok());
    }

    #[test]
    fn rejects_unparseable_url() {
        let feeds = vec![feed("not a url at all")];
        assert!(matches!(
            validate_feed_urls(&feeds),
            Err(RuleError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn validate_formatted_message_rejects_empty_body() {
        let result = validate_formatted_message(FormattedMessage::Body(String::new()));
        assert!(result.is_err());
    }

    #[test]
    fn validate_formatted_message_drops_empty_buttons_and_rows() {
        use crate::model::Button;
        let keyboard = vec![
            vec![
                Button { text: "".into(), url: "https://x".into() },
                Button { text: "ok".into(), url: "https://x".into() },
            ],
            vec![Button { text: "".into(), url: "".into() }],
        ];
        let result =
            validate_formatted_message(FormattedMessage::WithKeyboard("hi".into(), keyboard)).unwrap();
        let kb = result.keyboard().unwrap();
        assert_eq!(kb.len(), 1);
        assert_eq!(kb[0].len(), 1);
        assert_eq!(kb[0][0].text, "ok");
    }
}
