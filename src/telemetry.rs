use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the `RUST_LOG`-driven fmt subscriber (default `info`).
///
/// Leaves an existing global subscriber in place, so hosts that already
/// configured tracing can call this safely.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed, keeping it");
    }
}
