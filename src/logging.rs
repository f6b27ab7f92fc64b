//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set.
pub fn default_directive(verbosity: u8, quiet: bool) -> String {
    let level = if quiet {
        "warn"
    } else {
        match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    format!("warn,parley={level}")
}

/// Install the global subscriber. Logs go to stderr so text mode output on
/// stdout stays clean. Calling this twice is harmless.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 1)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_selects_level() {
        assert_eq!(default_directive(0, false), "warn,parley=info");
        assert_eq!(default_directive(1, false), "warn,parley=debug");
        assert_eq!(default_directive(2, false), "warn,parley=trace");
        assert_eq!(default_directive(5, false), "warn,parley=trace");
    }

    #[test]
    fn test_quiet_wins_over_verbose() {
        assert_eq!(default_directive(2, true), "warn,parley=warn");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(0, false);
        init(1, false);
    }
}
