//! Diagnostic tracing for people debugging the publisher itself.
//!
//! A publish run talks on two channels. The build log ([`crate::io::log_sink`])
//! is what the host shows next to the build: git commands, the commit/tag
//! banner, revision changes and categorized failures. It is written no matter
//! how tracing is configured.
//!
//! Tracing events and spans (`#[instrument]` on the engine, façade and git
//! adapter) go to stderr only, filtered by `RUST_LOG`. They carry the
//! structured detail (exit codes, truncation counts, timeouts) that does not
//! belong in a build log.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparseable.
const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. Call once, before any publish work.
///
/// ```bash
/// RUST_LOG=publisher::io::git=debug publisher publish --project app --build 7 ...
/// ```
///
/// A second call (tests, embedding hosts) leaves the first subscriber in place.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init();
}
