//! Process-wide logging setup shared by the worker binary and local tooling.

pub mod subscriber;

pub use subscriber::{DEFAULT_DIRECTIVE, LogFormat};

/// Install the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Output is JSON unless `LOG_FORMAT=pretty`. Safe to call more than once;
/// only the first call installs anything.
pub fn init() {
    let format = std::env::var("LOG_FORMAT").map(|v| LogFormat::from_name(&v)).unwrap_or_default();
    subscriber::init(format);
}
