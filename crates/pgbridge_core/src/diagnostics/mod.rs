//! Logger shim over a host-supplied sink, plus the environment report.
//!
//! - `logger` - `LogSink` trait, `DiagnosticLogger`, bundled sinks
//! - `system` - `SystemSnapshot` and the fixed-format diagnostics block

pub mod logger;
pub mod system;

pub use logger::{
    redact, serialize_error, DiagnosticLogger, LogLevel, LogSink, RecordingSink, SinkRecord,
    TracingSink, HIDDEN_VALUE,
};
pub use system::{format_memory, format_uptime, render_report, SystemSnapshot, PLUGIN_VERSION};
