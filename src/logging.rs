//! Subscriber setup for binaries and tests. Library code only emits events.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs a compact stderr subscriber. `RUST_LOG`, when set, overrides
/// `level`. A second call leaves the first subscriber in place.
pub fn init_logging(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let installed = tracing_subscriber::fmt()
        .compact()
        .with_ansi(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = installed {
        crate::debug!("Logger already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(Level::DEBUG);
        init_logging(Level::TRACE);
        crate::info!("still logging");
    }
}
