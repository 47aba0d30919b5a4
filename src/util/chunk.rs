//! Splits an outgoing message body into rune-cap-bounded chunks.
//!
//! # Algorithm
//!
//! Trim the outer whitespace first. If the whole (trimmed) body fits within
//! `cap` runes, return it as a single chunk. Otherwise, repeatedly take the
//! next `cap`-rune prefix of what remains and cut it at the latest newline
//! within that prefix; if there is none, the latest whitespace; if neither,
//! cut at the rune cap itself. Each resulting chunk is trimmed; empty chunks
//! are skipped. Word boundaries are preserved wherever a newline or
//! whitespace cut point exists, and no chunk ever exceeds `cap` runes.
//!
//! # Examples
//!
//! ```
//! use tgfeed::util::split;
//!
//! let chunks = split(&"a".repeat(4100), 4096);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].chars().count(), 4096);
//! assert_eq!(chunks[1].chars().count(), 4);
//! ```
pub fn split(s: &str, cap: usize) -> Vec<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let runes: Vec<char> = trimmed.chars().collect();
    if runes.len() <= cap {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < runes.len() {
        let remaining = runes.len() - start;
        if remaining <= cap {
            push_trimmed(&mut chunks, &runes[start..]);
            break;
        }

        let window = &runes[start..start + cap];
        let cut = latest_newline(window)
            .or_else(|| latest_whitespace(window))
            .unwrap_or(cap);

        // A cut of 0 (e.g. the window starts with whitespace/newline after
        // trimming the previous chunk) would make no progress; fall back to
        // the hard cap in that case.
        let cut = if cut == 0 { cap } else { cut };

        push_trimmed(&mut chunks, &runes[start..start + cut]);
        start += cut;
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, runes: &[char]) {
    let s: String = runes.iter().collect();
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn latest_newline(window: &[char]) -> Option<usize> {
    window.iter().rposition(|&c| c == '\n').map(|idx| idx + 1)
}

fn latest_whitespace(window: &[char]) -> Option<usize> {
    window
        .iter()
        .rposition(|c| c.is_whitespace())
        .map(|idx| idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_in_one_chunk() {
        let chunks = split("hello world", 4096);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn empty_and_whitespace_only_produce_no_chunks() {
        assert!(split("", 4096).is_empty());
        assert!(split("   \n\t  ", 4096).is_empty());
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let chunks = split(&"a".repeat(4100), 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1], "a".repeat(4));
    }

    #[test]
    fn splits_on_latest_newline() {
        let body = format!("{}\n{}", "a".repeat(4000), "b".repeat(100));
        let chunks = split(&body, 4096);
        assert_eq!(chunks, vec!["a".repeat(4000), "b".repeat(100)]);
    }

    #[test]
    fn splits_on_latest_whitespace_when_no_newline() {
        let body = format!("{} {}", "a".repeat(4090), "b".repeat(100));
        let chunks = split(&body, 4096);
        assert_eq!(chunks[0], "a".repeat(4090));
        assert_eq!(chunks[1], "b".repeat(100));
    }

    #[test]
    fn every_chunk_stays_within_cap_and_is_non_empty() {
        let body = "word ".repeat(2000);
        let chunks = split(&body, 4096);
        for c in &chunks {
            assert!(c.chars().count() <= 4096);
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn concatenation_with_newline_equals_trimmed_input() {
        let body = format!("{}\n{}", "a".repeat(4000), "b".repeat(100));
        let chunks = split(&body, 4096);
        assert_eq!(chunks.join("\n"), body.trim());
    }

    #[test]
    fn respects_multibyte_runes_not_bytes() {
        // Each "字" is 3 bytes in UTF-8 but 1 rune; ensure cap counts runes.
        let body = "字".repeat(5000);
        let chunks = split(&body, 4096);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 904);
    }
}
