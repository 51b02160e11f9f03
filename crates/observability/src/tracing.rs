//! Subscriber configuration.
//!
//! Logs are JSON lines with timestamps. `RUST_LOG` overrides the default
//! directive, e.g. `RUST_LOG=levy_infra=debug,info`.

use tracing_subscriber::EnvFilter;

/// Build the env filter, falling back to `default_directive` when `RUST_LOG`
/// is unset or unparsable.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .with_current_span(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init("warn");
        assert!(!init("debug"));
    }
}
