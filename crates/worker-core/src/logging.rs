use tracing_subscriber::EnvFilter;

/// Installs the process-wide fmt subscriber on stderr.
///
/// `RUST_LOG` wins over `default_directive`. Calling this twice is harmless.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
