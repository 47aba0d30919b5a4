//! Parsing helpers for the special, non-standard feed-source behaviors
//! named in §6: the `tg.i-c-a.su` rate-limit envelope, and the
//! `tgfeed://` scheme used to route to in-process adapters instead of HTTP.

use chrono::Duration;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    errors: Vec<String>,
}

/// Recognizes the `tg.i-c-a.su` JSON error body `{"errors":[...]}` and
/// extracts a retry delay from the first recognized token: `FLOOD_WAIT_<N>`
/// (seconds) or `"Time to unlock access: HH:MM:SS"`.
pub fn parse_rate_limit_body(body: &[u8]) -> Option<Duration> {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).ok()?;
    envelope.errors.iter().find_map(|token| parse_token(token))
}

fn parse_token(token: &str) -> Option<Duration> {
    if let Some(rest) = token.strip_prefix("FLOOD_WAIT_") {
        return rest.parse::<i64>().ok().map(Duration::seconds);
    }
    if let Some(rest) = token.strip_prefix("Time to unlock access: ") {
        return parse_hms(rest);
    }
    None
}

fn parse_hms(s: &str) -> Option<Duration> {
    let mut parts = s.splitn(3, ':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let sec: i64 = parts.next()?.parse().ok()?;
    Some(Duration::hours(h) + Duration::minutes(m) + Duration::seconds(sec))
}

/// A `tgfeed://` URL's host, used to route to the matching in-process
/// adapter. Returns `None` for any other scheme.
pub fn special_host(url: &str) -> Option<&str> {
    url.strip_prefix("tgfeed://")
}
