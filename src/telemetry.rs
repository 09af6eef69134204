//! Tracing subscriber setup for the binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
fn default_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("medscore_guard=debug,info")
    } else {
        EnvFilter::new("warn")
    }
}

/// Install the global subscriber; logs go to stderr so command output stays clean.
///
/// `RUST_LOG` overrides the level chosen by `debug`.
pub fn init_tracing(debug: bool, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(debug)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}
