//! The item-decision algorithm: a pure function from (feed config, feed
//! state, item, now) to an outcome. No I/O; block/keep predicates are
//! already folded to `bool` by the [`crate::rules::RuleSet`] contract, so
//! this module never sees a raised exception.

use crate::model::{FeedConfig, FeedState, Item};
use crate::rules::RuleSet;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Drop the item entirely; nothing is marked seen or emitted.
    Skip,
    /// Record the guid as seen without emitting anything (always-send mode,
    /// first observation of a feed or of always-send itself).
    MarkSeenOnly { guid: String },
    /// Emit a single-item update. For always-send feeds this also implies
    /// marking `guid` seen.
    Process { mark_seen: Option<String> },
    /// Append to this run's digest bucket for the feed instead of emitting
    /// immediately.
    Digest { mark_seen: Option<String> },
}

/// `exists_before_run` / `just_enabled` are computed by the caller from the
/// state observed before this fetch started (§4.6's `exists_before_run`,
/// `justEnabled`).
pub fn decide(
    feed: &FeedConfig,
    state: &FeedState,
    item: &Item,
    exists_before_run: bool,
    just_enabled: bool,
    now: DateTime<Utc>,
    lookback_period: chrono::Duration,
    rules: &dyn RuleSet,
) -> Outcome {
    let selection = if feed.always_send_new_items {
        select_always_send(feed, state, item, exists_before_run, just_enabled, now, lookback_period)
    } else {
        select_regular(state, item)
    };

    match selection {
        Selection::Skip => Outcome::Skip,
        Selection::MarkSeenOnly { guid } => Outcome::MarkSeenOnly { guid },
        Selection::Candidate { mark_seen } => apply_rules(feed, item, mark_seen, rules),
    }
}

enum Selection {
    Skip,
    MarkSeenOnly { guid: String },
    Candidate { mark_seen: Option<String> },
}

fn select_always_send(
    feed: &FeedConfig,
    state: &FeedState,
    item: &Item,
    exists_before_run: bool,
    just_enabled: bool,
    now: DateTime<Utc>,
    lookback_period: chrono::Duration,
) -> Selection {
    let _ = feed;
    if let Some(published) = item.published {
        if now.signed_duration_since(published) > lookback_period {
            return Selection::Skip;
        }
    }

    let Some(guid) = item.seen_key().map(|s| s.to_string()) else {
        return Selection::Skip;
    };

    if state.is_seen(&guid) {
        return Selection::Skip;
    }

    if !exists_before_run || just_enabled {
        Selection::MarkSeenOnly { guid }
    } else {
        Selection::Candidate { mark_seen: Some(guid) }
    }
}

fn select_regular(state: &FeedState, item: &Item) -> Selection {
    if let Some(published) = item.published {
        if published < state.last_updated {
            return Selection::Skip;
        }
    }
    Selection::Candidate { mark_seen: None }
}

fn apply_rules(feed: &FeedConfig, item: &Item, mark_seen: Option<String>, rules: &dyn RuleSet) -> Outcome {
    if rules.block(feed, item) {
        return Outcome::Skip;
    }
    if !rules.keep(feed, item) {
        return Outcome::Skip;
    }
    if feed.digest {
        Outcome::Digest { mark_seen }
    } else {
        Outcome::Process { mark_seen }
    }
}
