use std::str::FromStr;
use tracing::Level;

/// Installs the fmt subscriber. Unknown level names fall back to `info`, and a
/// second call leaves the already-installed subscriber in place.
pub fn init_logging(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging already initialized, keeping existing subscriber");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        init_logging("debug");
        init_logging("not-a-level");
    }
}
