//! Tracing subscriber initialization for the vdbench binaries.
//!
//! Library code only emits `tracing` events; the binary decides where they go.
//!
//! ```no_run
//! use vdbench_core::telemetry;
//!
//! // RUST_LOG=vdbench=debug,info
//! telemetry::init_dev_subscriber_with_env_filter();
//! tracing::info!("Application started");
//! ```

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize a stderr subscriber that respects `RUST_LOG`.
///
/// Output goes to stderr so stdout stays free for result tables and JSON.
/// Returns an error if a global subscriber is already installed.
pub fn init_dev_subscriber_with_env_filter() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// Install a test writer subscriber; safe to call from many tests.
pub fn init_test_subscriber() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
