// Keel Core - Duration strings
//
// Resource specs carry durations as compact strings ("30s", "5m", "720h").
// Bare numbers are seconds. Fractions are not supported.

use std::time::Duration;

use crate::error::{KeelError, KeelResult};

/// Parse a duration string of the form `<digits>[s|m|h]`.
pub fn parse_duration(raw: &str) -> KeelResult<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(KeelError::validation("empty duration"));
    }

    let (digits, multiplier) = match raw.as_bytes()[raw.len() - 1] {
        b's' => (&raw[..raw.len() - 1], 1),
        b'm' => (&raw[..raw.len() - 1], 60),
        b'h' => (&raw[..raw.len() - 1], 3600),
        _ => (raw, 1),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| KeelError::validation(format!("invalid duration \"{}\"", raw)))?;
    Ok(Duration::from_secs(value * multiplier))
}

/// Human-compact rendering used in status.duration
pub fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1.5m").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_duration(Duration::from_millis(1274)), "1.274s");
    }
}
