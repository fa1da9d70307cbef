//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "warn,tally=debug"
    } else {
        "warn,tally=info"
    }
}

/// Install a stderr subscriber so stdout carries only command output.
///
/// A second call is a no-op.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        assert_eq!(default_filter(false), "warn,tally=info");
        assert_eq!(default_filter(true), "warn,tally=debug");
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(false);
        init_logging(true);
    }
}
