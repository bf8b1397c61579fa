//! Log setup for binaries and tests

use tracing::Level;

/// Installs a `tracing-subscriber` fmt subscriber writing to stderr
///
/// `verbosity` 0 logs at `info`, 1 at `debug`, 2 or more at `trace`.
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(verbosity: u8) -> bool {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(verbosity > 1)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
