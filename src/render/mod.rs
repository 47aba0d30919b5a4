//! Turns decided items into an outgoing message: either the built-in
//! template or a call into the rules script's `format`, with fallback to
//! built-in on any invalid shape (§4.7).

use crate::model::{Button, Item, Keyboard};
use crate::rules::{FormattedMessage, RuleSet};
use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub body: String,
    pub keyboard: Option<Keyboard>,
    pub suppress_link_preview: bool,
}

/// `items` is one element for a single-item update, or the feed's whole
/// digest bucket for a bundle update.
pub fn render(
    feed: &crate::model::FeedConfig,
    items: &[Item],
    rules: &dyn RuleSet,
) -> RenderedMessage {
    let default_title = feed.display_title().to_string();

    if feed.has_format {
        if let Some(msg) = rules.format(feed, items, &default_title) {
            return RenderedMessage {
                body: msg.body().to_string(),
                keyboard: msg.keyboard().cloned(),
                suppress_link_preview: false,
            };
        }
    }

    if feed.digest {
        render_digest(&default_title, items)
    } else {
        render_single(items.first())
    }
}

fn render_single(item: Option<&Item>) -> RenderedMessage {
    let Some(item) = item else {
        return RenderedMessage { body: String::new(), keyboard: None, suppress_link_preview: false };
    };

    let link = item.link.clone().unwrap_or_default();
    let title = item.title.clone().unwrap_or_else(|| link.clone());
    let hashtag = link_hashtag(&link);

    let mut body = format!("<a href=\"{link}\">{title}</a>");
    if let Some(tag) = hashtag {
        body.push_str(&format!("\n{tag}"));
    }

    let keyboard = hacker_news_keyboard(item.guid.as_deref());

    RenderedMessage { body, keyboard, suppress_link_preview: false }
}

fn render_digest(title: &str, items: &[Item]) -> RenderedMessage {
    let mut body = format!("<b>{title}</b>\n\n");
    for item in items {
        let link = item.link.clone().unwrap_or_default();
        let item_title = item.title.clone().unwrap_or_else(|| link.clone());
        body.push_str(&format!("• <a href=\"{link}\">{item_title}</a>\n"));
    }

    RenderedMessage { body: body.trim_end().to_string(), keyboard: None, suppress_link_preview: true }
}

fn hacker_news_keyboard(guid: Option<&str>) -> Option<Keyboard> {
    let guid = guid?;
    if !guid.starts_with("https://news.ycombinator.com/item?id=") {
        return None;
    }
    Some(vec![vec![Button { text: "↪ Hacker News".to_string(), url: guid.to_string() }]])
}

/// Derives the hashtag shown under a built-in single-item message from the
/// link's host: a couple of well-known hosts get a friendly name, everything
/// else is the bare host with non-alphanumerics stripped.
fn link_hashtag(link: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    let host = url.host_str()?;

    let tag = match host {
        "t.me" => "tg".to_string(),
        "www.youtube.com" => "youtube".to_string(),
        other => NON_ALPHANUMERIC.replace_all(other, "").to_string(),
    };

    if tag.is_empty() {
        None
    } else {
        Some(format!("#{tag}"))
    }
}
