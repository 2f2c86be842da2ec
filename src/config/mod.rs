//! Configuration module for astra.
//!
//! Two sources feed the runtime configuration:
//! - the process environment (`EnvConfig`), optionally seeded from `.env`
//! - the user preference file (`Preferences`)

mod env;
mod preferences;

use std::time::Duration;

pub use env::{load_dotenv, EnvConfig, DEFAULT_DEVSTATE_DIR, DEFAULT_DOCKER_CMD, DEFAULT_PODMAN_CMD};
pub use preferences::{Preferences, PREFERENCE_FILE};

/// Parses durations written as `90`, `500ms`, `30s`, `4m` or `1h`.
///
/// A bare number is read as seconds.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: u64 = number.parse().ok()?;

    match unit {
        "" | "s" => Some(Duration::from_secs(number)),
        "ms" => Some(Duration::from_millis(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("4m"), Some(Duration::from_secs(240)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1d"), None);
        assert_eq!(parse_duration("s"), None);
    }
}
