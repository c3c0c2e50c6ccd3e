//! Process-wide tracing setup.

/// Subscriber configuration: output format and filtering.
pub mod subscriber;

pub use subscriber::{LogFormat, ParseLogFormatError};

/// Initialize process-wide tracing with the format named by
/// `STOCKLEDGER_LOG_FORMAT` (JSON when unset or unrecognised).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var(subscriber::LOG_FORMAT_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    subscriber::init_with(format);
}

/// Initialize process-wide tracing with an explicit format.
pub fn init_with(format: LogFormat) {
    subscriber::init_with(format);
}
