//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directive for the given verbosity flags.
///
/// `--quiet` wins over `-v`. Other crates stay at `warn`.
pub fn filter_directive(verbose: u8, quiet: bool) -> String {
    if quiet {
        return "warn".to_string();
    }
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => return "trace".to_string(),
    };
    format!("talkback={},warn", level)
}

/// Install the stderr subscriber. `RUST_LOG` overrides the flags when set.
///
/// Safe to call twice; the second call is a no-op.
pub fn init_logging(verbose: u8, quiet: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbose, quiet)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .without_time();

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!(verbose, quiet, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_info_for_crate() {
        assert_eq!(filter_directive(0, false), "talkback=info,warn");
    }

    #[test]
    fn test_single_verbose_is_debug() {
        assert_eq!(filter_directive(1, false), "talkback=debug,warn");
    }

    #[test]
    fn test_double_verbose_traces_everything() {
        assert_eq!(filter_directive(2, false), "trace");
        assert_eq!(filter_directive(5, false), "trace");
    }

    #[test]
    fn test_quiet_overrides_verbose() {
        assert_eq!(filter_directive(0, true), "warn");
        assert_eq!(filter_directive(2, true), "warn");
    }

    #[test]
    fn test_directives_parse() {
        for (verbose, quiet) in [(0, false), (1, false), (2, false), (0, true)] {
            assert!(
                EnvFilter::try_new(filter_directive(verbose, quiet)).is_ok(),
                "directive for -v{} quiet={} should parse",
                verbose,
                quiet
            );
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(0, true);
        init_logging(1, false);
    }
}
