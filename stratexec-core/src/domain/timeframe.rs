//! Bar timeframe strings such as `1m`, `15m`, `1h`, `4h`, `1d`, `1w`.

use chrono::Duration;

/// Parse a timeframe label into its bar period.
///
/// Accepts `<count><unit>` with unit `s`, `m`, `h`, `d` or `w` (case
/// insensitive, `M` is not months). Returns `None` for anything else.
pub fn parse_timeframe(label: &str) -> Option<Duration> {
    let label = label.trim();
    let split = label.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = label.split_at(split);
    let count: i64 = if count.is_empty() { 1 } else { count.parse().ok()? };
    if count <= 0 {
        return None;
    }
    match unit.to_ascii_lowercase().as_str() {
        "s" => Some(Duration::seconds(count)),
        "m" | "min" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        "w" => Some(Duration::weeks(count)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_labels() {
        assert_eq!(parse_timeframe("1m"), Some(Duration::minutes(1)));
        assert_eq!(parse_timeframe("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_timeframe("4h"), Some(Duration::hours(4)));
        assert_eq!(parse_timeframe("1D"), Some(Duration::days(1)));
        assert_eq!(parse_timeframe("1w"), Some(Duration::weeks(1)));
        assert_eq!(parse_timeframe("d"), Some(Duration::days(1)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timeframe(""), None);
        assert_eq!(parse_timeframe("10"), None);
        assert_eq!(parse_timeframe("0h"), None);
        assert_eq!(parse_timeframe("3y"), None);
    }
}
