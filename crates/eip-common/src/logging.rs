//! Logging bootstrap

use tracing::Level;

/// Install a global fmt subscriber at `level`.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        let _ = init_logging(Level::DEBUG);
        assert!(!init_logging(Level::INFO));
    }
}
