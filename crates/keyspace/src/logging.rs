//! Log output setup.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`.
///
/// Falls back to `keyspace=info` when `RUST_LOG` is unset or invalid.
/// Calling it again, or after another global subscriber was installed, is
/// harmless.
pub fn init_logger() {
    init_logger_or("keyspace=info");
}

/// Like [`init_logger`] with a caller-chosen fallback filter.
pub fn init_logger_or(fallback: impl AsRef<str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
