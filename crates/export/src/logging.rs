//! Logging setup for binaries embedding the export engine.

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the engine logs at `level`.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "helios_export={},helios_export_worker={}",
            level, level
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
