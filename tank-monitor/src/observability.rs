use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber for the long-running service.
pub fn init_tracing() {
    init_tracing_with("tank_monitor=info");
}

/// Install the global fmt subscriber; `RUST_LOG` replaces `default_directive`.
///
/// Logs go to stderr so binaries that print reports keep stdout clean.
pub fn init_tracing_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
