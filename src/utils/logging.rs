//! Logging setup for the binary and the tests.

use std::str::FromStr;

use tracing::Level;

/// The level named by `name` (case-insensitive, `warning` accepted for
/// `warn`). Unknown names fall back to `info`.
pub fn parse_level(name: &str) -> Level {
    let name = name.trim();
    if name.eq_ignore_ascii_case("warning") {
        return Level::WARN;
    }
    Level::from_str(name).unwrap_or(Level::INFO)
}

/// Install a `fmt` subscriber capped at `level`, as read from `log.level`.
pub fn init(level: &str) {
    // the binary and the tests may both install a subscriber
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .try_init();
}
