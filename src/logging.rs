//! Optional log output for programs that do not set up tracing themselves.
//!
//! The library only emits `tracing` events; nothing is printed until a
//! subscriber is installed, either by the application or through [`init`].

use tracing::Level;

/// Environment variable that turns on debug output in [`init`].
pub const VERBOSE_ENV: &str = "SPICETREE_VERBOSE";

/// Installs a fmt subscriber at `ERROR`, or `DEBUG` when `SPICETREE_VERBOSE=1`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    init_with_level(level_from(std::env::var(VERBOSE_ENV).ok().as_deref()))
}

/// Installs a fmt subscriber at `level`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_level(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

fn level_from(verbose: Option<&str>) -> Level {
    match verbose {
        Some("1") => Level::DEBUG,
        _ => Level::ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_verbose() {
        assert_eq!(level_from(Some("1")), Level::DEBUG);
        assert_eq!(level_from(Some("true")), Level::ERROR);
        assert_eq!(level_from(None), Level::ERROR);
    }

    #[test]
    fn test_second_init_is_refused() {
        init_with_level(Level::ERROR);
        assert!(!init_with_level(Level::DEBUG));
    }
}
