//! Per-relay telemetry records.
//!
//! The relay hands one [`RelayLog`] to the installed sink after every call.
//! Nothing is recorded until [`set_telemetry_sink`] runs.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Receives finished relay records. Called inline at the end of each
/// relay, from whatever task ran it, so `record` should return quickly.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, log: RelayLog);
}

/// Writes each record as a single `tracing` event with dotted attribute keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, log: RelayLog) {
        let attrs = serde_json::Value::Object(log.attributes());
        if log.error_code.is_some() {
            tracing::warn!(target: "airelay::relay", attributes = %attrs, "relay finished with error");
        } else {
            tracing::info!(target: "airelay::relay", attributes = %attrs, "relay finished");
        }
    }
}

static SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// Unit tests share the process-wide sink; only threads that opt in emit.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install the process-wide sink. Returns `false` if one is already set.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    SINK.set(sink).is_ok()
}

pub(crate) fn emit(log: RelayLog) {
    #[cfg(test)]
    if !TEST_CAPTURE.with(|c| c.get()) {
        return;
    }
    if let Some(sink) = SINK.get() {
        sink.record(log);
    }
}

#[cfg(test)]
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
