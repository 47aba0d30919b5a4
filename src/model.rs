//! Core data shapes shared across the pipeline: the authored feed config, the
//! parsed item, and the renderer's button/keyboard vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One `feed(...)` call from the rules script. Immutable within a run.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub title: Option<String>,
    pub topic: Option<i64>,
    pub has_block_rule: bool,
    pub has_keep_rule: bool,
    pub has_format: bool,
    pub digest: bool,
    pub always_send_new_items: bool,
    /// GitHub login denylist for the `github-notifications` special feed;
    /// PRs authored by these logins are suppressed (spec.md §6).
    pub github_pr_author_denylist: Vec<String>,
}

impl FeedConfig {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// An item extracted from a parsed feed (RSS/Atom/JSON-Feed) or a special
/// adapter. `extensions` is an opaque JSON tree passed through unmodified.
#[derive(Debug, Clone, Default)]
pub struct Item {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub categories: Vec<String>,
    pub guid: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub extensions: serde_json::Value,
}

impl Item {
    /// `guid || link`, used as the seen-items key in always-send mode.
    pub fn seen_key(&self) -> Option<&str> {
        self.guid.as_deref().or(self.link.as_deref())
    }

    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.link.clone())
            .unwrap_or_else(|| "(untitled)".to_string())
    }
}

/// Per-feed persisted state (spec.md §3 "Feed state").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedState {
    pub disabled: bool,
    pub last_updated: DateTime<Utc>,
    pub last_modified: String,
    pub etag: String,
    pub error_count: u32,
    pub last_error: String,
    /// guid -> first-seen timestamp; only populated for always-send feeds.
    pub seen_items: Option<BTreeMap<String, DateTime<Utc>>>,
    pub fetch_count: u64,
    pub fetch_fail_count: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            disabled: false,
            last_updated: Utc::now(),
            last_modified: String::new(),
            etag: String::new(),
            error_count: 0,
            last_error: String::new(),
            seen_items: None,
            fetch_count: 0,
            fetch_fail_count: 0,
        }
    }
}

/// One inline-keyboard button.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub url: String,
}

pub type Keyboard = Vec<Vec<Button>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_key_prefers_guid() {
        let item = Item {
            guid: Some("g1".into()),
            link: Some("https://example.com".into()),
            ..Default::default()
        };
        assert_eq!(item.seen_key(), Some("g1"));
    }

    #[test]
    fn seen_key_falls_back_to_link() {
        let item = Item {
            guid: None,
            link: Some("https://example.com".into()),
            ..Default::default()
        };
        assert_eq!(item.seen_key(), Some("https://example.com"));
    }

    #[test]
    fn feed_state_error_invariant_holds_by_construction() {
        let s = FeedState::default();
        assert_eq!(s.error_count, 0);
        assert_eq!(s.last_error, "");
    }
}
