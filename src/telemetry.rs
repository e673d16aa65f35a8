use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: Once = Once::new();

/// Installs the global subscriber. Output goes to stderr: stdout carries the
/// JSON-lines protocol.
pub fn init_tracing(json: bool) {
    TRACING_INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schoold=info"));
        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    });
}
