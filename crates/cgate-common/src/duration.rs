use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration {0:?}: expected seconds or <n>(s|m|h)")]
pub struct DurationParseError(pub String);

/// Parses `"25"` (seconds), `"25s"`, `"10m"` or `"2h"`.
pub fn parse_duration(value: &str) -> Result<Duration, DurationParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError(value.to_string()));
    }

    let (number, unit) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_digit() => (trimmed, 1u64),
        Some('s') => (&trimmed[..trimmed.len() - 1], 1),
        Some('m') => (&trimmed[..trimmed.len() - 1], 60),
        Some('h') => (&trimmed[..trimmed.len() - 1], 3600),
        _ => return Err(DurationParseError(value.to_string())),
    };

    let seconds: u64 = number
        .parse()
        .map_err(|_| DurationParseError(value.to_string()))?;
    Ok(Duration::from_secs(seconds * unit))
}
