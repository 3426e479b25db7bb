//! Logging bootstrap, mirroring the verbose/info switch of a CLI entry point
//! without depending on one: callers decide verbosity, this just wires it to
//! a global subscriber.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs a global `tracing` subscriber. Safe to call more than once per
/// process; later calls are no-ops if a subscriber is already installed.
pub fn init_tracing(verbose: bool) {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
