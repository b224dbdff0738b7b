//! Utility functions for Latchkey

use std::time::Duration;

/// Parse a human-friendly duration such as `"500ms"`, `"15s"`, `"1m"` or `"2h"`.
///
/// A bare number is read as seconds. Returns `None` for empty or malformed input.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use latchkey_common::parse_duration;
///
/// assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
/// assert_eq!(parse_duration("15s"), Some(Duration::from_secs(15)));
/// assert_eq!(parse_duration("3"), Some(Duration::from_secs(3)));
/// assert_eq!(parse_duration("soon"), None);
/// ```
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, 1u64)
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1000u64)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60_000u64)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3_600_000u64)
    } else {
        (s, 1000u64)
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("10ms"), Some(Duration::from_millis(10)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration(" 7 "), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("ms"), None);
        assert_eq!(parse_duration("-1s"), None);
        assert_eq!(parse_duration("1.5s"), None);
        assert_eq!(parse_duration("ten seconds"), None);
    }

    #[test]
    fn test_parse_overflow() {
        assert_eq!(parse_duration(&format!("{}h", u64::MAX)), None);
    }

    proptest! {
        #[test]
        fn prop_millis_roundtrip(n in 0u64..1_000_000_000) {
            prop_assert_eq!(parse_duration(&format!("{n}ms")), Some(Duration::from_millis(n)));
        }

        #[test]
        fn prop_never_panics(s in ".*") {
            let _ = parse_duration(&s);
        }
    }
}
