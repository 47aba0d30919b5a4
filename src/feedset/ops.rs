//! The per-feed state machine operations from the state-operations table.
//!
//! Every operation here is a plain, side-effect-free mutation on an owned
//! [`FeedState`] — no I/O, no locking — so they're unit-testable without the
//! surrounding [`super::FeedSet`] guard.

use crate::model::FeedState;
use chrono::{DateTime, Utc};

impl FeedState {
    /// 304 Not Modified: clears failure bookkeeping, bumps `last_updated`.
    pub fn mark_not_modified(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
        self.error_count = 0;
        self.last_error.clear();
    }

    pub fn update_cache_headers(&mut self, etag: &str, last_modified: &str) {
        self.etag = etag.to_string();
        if !last_modified.is_empty() {
            self.last_modified = last_modified.to_string();
        }
    }

    pub fn mark_fetch_success(&mut self, now: DateTime<Utc>) {
        self.mark_not_modified(now);
        self.fetch_count += 1;
    }

    /// Records a failure. Returns `true` iff this call is the one that
    /// transitions the feed from enabled to disabled (so the caller can emit
    /// exactly one disable notification per transition).
    pub fn mark_fetch_failure(&mut self, err: &str, threshold: u32) -> bool {
        self.fetch_fail_count += 1;
        self.error_count += 1;
        self.last_error = err.to_string();

        if !self.disabled && self.error_count >= threshold {
            self.disabled = true;
            return true;
        }
        false
    }

    pub fn reenable(&mut self) {
        self.disabled = false;
        self.error_count = 0;
        self.last_error.clear();
    }

    /// Ensures `seen_items` exists and is pruned of entries older than
    /// `cleanup_period`. Returns `true` iff this call just enabled the
    /// always-send mode for the first time (the seen map didn't exist yet).
    pub fn prepare_seen_items(&mut self, now: DateTime<Utc>, cleanup_period: chrono::Duration) -> bool {
        match &mut self.seen_items {
            None => {
                self.seen_items = Some(Default::default());
                true
            }
            Some(map) => {
                map.retain(|_, first_seen| now.signed_duration_since(*first_seen) <= cleanup_period);
                false
            }
        }
    }

    pub fn mark_seen(&mut self, guid: &str, now: DateTime<Utc>) {
        self.seen_items
            .get_or_insert_with(Default::default)
            .entry(guid.to_string())
            .or_insert(now);
    }

    pub fn is_seen(&self, guid: &str) -> bool {
        self.seen_items
            .as_ref()
            .map(|m| m.contains_key(guid))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn not_modified_clears_failures() {
        let mut s = FeedState {
            error_count: 3,
            last_error: "boom".into(),
            ..Default::default()
        };
        s.mark_not_modified(t(100));
        assert_eq!(s.error_count, 0);
        assert_eq!(s.last_error, "");
        assert_eq!(s.last_updated, t(100));
    }

    #[test]
    fn idempotent_not_modified_twice_leaves_state_unchanged_except_timestamp() {
        let mut s = FeedState::default();
        s.mark_not_modified(t(1));
        let after_first = s.clone();
        s.mark_not_modified(t(2));
        assert_eq!(s.error_count, after_first.error_count);
        assert_eq!(s.last_error, after_first.last_error);
        assert_eq!(s.seen_items, after_first.seen_items);
        assert_eq!(s.last_updated, t(2));
    }

    #[test]
    fn failure_monotonicity() {
        let mut s = FeedState::default();
        let mut prev_errors = 0;
        let mut prev_fails = 0;
        for i in 0..5 {
            s.mark_fetch_failure(&format!("err{i}"), 100);
            assert!(s.error_count > prev_errors);
            assert!(s.fetch_fail_count > prev_fails);
            prev_errors = s.error_count;
            prev_fails = s.fetch_fail_count;
        }
    }

    #[test]
    fn disable_transition_fires_exactly_once() {
        let mut s = FeedState::default();
        let mut transitions = 0;
        for i in 0..20 {
            if s.mark_fetch_failure(&format!("err{i}"), 12) {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
        assert!(s.disabled);
        assert_eq!(s.error_count, 20);
    }

    #[test]
    fn reenable_resets_everything() {
        let mut s = FeedState::default();
        for i in 0..12 {
            s.mark_fetch_failure(&format!("err{i}"), 12);
        }
        assert!(s.disabled);
        s.reenable();
        assert!(!s.disabled);
        assert_eq!(s.error_count, 0);
        assert_eq!(s.last_error, "");
    }

    #[test]
    fn seen_items_first_enable_reports_just_enabled() {
        let mut s = FeedState::default();
        let just_enabled = s.prepare_seen_items(t(0), Duration::days(28));
        assert!(just_enabled);
        let just_enabled_again = s.prepare_seen_items(t(1), Duration::days(28));
        assert!(!just_enabled_again);
    }

    #[test]
    fn seen_items_pruned_after_cleanup_period() {
        let mut s = FeedState::default();
        s.prepare_seen_items(t(0), Duration::days(28));
        s.mark_seen("a", t(0));
        s.mark_seen("b", t(10 * 86400));
        // 40 days later: "a" (40d old) should be pruned, "b" (30d old) kept.
        s.prepare_seen_items(t(40 * 86400), Duration::days(28));
        assert!(!s.is_seen("a"));
        assert!(s.is_seen("b"));
    }

    #[test]
    fn mark_seen_does_not_overwrite_first_seen_timestamp() {
        let mut s = FeedState::default();
        s.prepare_seen_items(t(0), Duration::days(28));
        s.mark_seen("a", t(0));
        s.mark_seen("a", t(100));
        assert_eq!(s.seen_items.as_ref().unwrap().get("a"), Some(&t(0)));
    }
}
