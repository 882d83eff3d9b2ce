//! Logger shim forwarding `info`, `progress` and `error` to a host sink.

use crate::diagnostics::system::{render_report, SystemSnapshot, PLUGIN_VERSION};
use crate::error::ConnectionError;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Replacement written over redacted values.
pub const HIDDEN_VALUE: &str = "[hidden]";

/// Severity of a host log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Host-side logging primitives the shim forwards to.
///
/// Implementations decide what `hidden_keys` means for their output; the
/// bundled sinks redact matching object keys at any depth.
pub trait LogSink: Send + Sync {
    /// Record a structured payload.
    fn log(&self, level: LogLevel, payload: Value, tag: &str, hidden_keys: &[String]);

    /// Record a progress update.
    fn progress(&self, payload: Value);

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Logger shim handed to the establisher and used throughout the host.
#[derive(Clone)]
pub struct DiagnosticLogger {
    title: String,
    sink: Arc<dyn LogSink>,
    hidden_keys: Arc<[String]>,
    plugin_version: &'static str,
}

impl fmt::Debug for DiagnosticLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticLogger")
            .field("title", &self.title)
            .field("sink", &self.sink.name())
            .field("hidden_keys", &self.hidden_keys)
            .finish()
    }
}

impl DiagnosticLogger {
    /// Create a logger tagging every record with `title`.
    pub fn new(title: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            title: title.into(),
            sink,
            hidden_keys: Arc::from(Vec::new()),
            plugin_version: PLUGIN_VERSION,
        }
    }

    /// Keys the sink should redact from `info` payloads.
    pub fn with_hidden_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Override the version reported as "Plugin version".
    pub fn with_plugin_version(mut self, version: &'static str) -> Self {
        self.plugin_version = version;
        self
    }

    /// Tag attached to every record.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Emit `{message, ...extra}` at info level.
    ///
    /// Keys in `extra` win over `message`. A non-object `extra` lands under `data`.
    pub fn info(&self, message: &str, extra: Value) {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.to_string()));
        match extra {
            Value::Object(fields) => payload.extend(fields),
            Value::Null => {}
            other => {
                payload.insert("data".to_string(), other);
            }
        }

        self.sink.log(LogLevel::Info, Value::Object(payload), &self.title, &self.hidden_keys);
    }

    /// Emit a progress record. Missing names become empty strings.
    pub fn progress(&self, message: &str, container_name: Option<&str>, entity_name: Option<&str>) {
        self.sink.progress(json!({
            "message": message,
            "containerName": container_name.unwrap_or_default(),
            "entityName": entity_name.unwrap_or_default(),
        }));
    }

    /// Emit an error as a plain record.
    pub fn error(&self, err: &(dyn Error + 'static)) {
        self.sink.log(LogLevel::Error, serialize_error(err), &self.title, &[]);
    }

    /// Environment report for support requests.
    pub fn render_diagnostics(&self, app_version: &str) -> String {
        render_report(
            app_version,
            self.plugin_version,
            &SystemSnapshot::collect(),
            chrono::Local::now(),
        )
    }
}

/// Flatten an error into plain data: message, kind, hint, cause chain and debug form.
pub fn serialize_error(err: &(dyn Error + 'static)) -> Value {
    let mut record = Map::new();
    record.insert("message".to_string(), Value::String(err.to_string()));

    if let Some(conn_err) = err.downcast_ref::<ConnectionError>() {
        record.insert("kind".to_string(), Value::String(conn_err.category().to_string()));
        if let Some(hint) = conn_err.hint() {
            record.insert("hint".to_string(), Value::String(hint.to_string()));
        }
    }

    let mut sources = Vec::new();
    let mut cause = err.source();
    while let Some(inner) = cause {
        sources.push(Value::String(inner.to_string()));
        cause = inner.source();
    }
    record.insert("sources".to_string(), Value::Array(sources));
    record.insert("debug".to_string(), Value::String(format!("{err:?}")));

    Value::Object(record)
}

/// Replace the value of every `hidden_keys` entry, at any depth.
pub fn redact(value: Value, hidden_keys: &[String]) -> Value {
    if hidden_keys.is_empty() {
        return value;
    }

    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, inner)| {
                    if hidden_keys.iter().any(|hidden| *hidden == key) {
                        (key, Value::String(HIDDEN_VALUE.to_string()))
                    } else {
                        (key, redact(inner, hidden_keys))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| redact(item, hidden_keys)).collect())
        }
        other => other,
    }
}

// ============================================================================
// Bundled sinks
// ============================================================================

/// Sink that turns host records into `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, payload: Value, tag: &str, hidden_keys: &[String]) {
        let payload = redact(payload, hidden_keys);
        match level {
            LogLevel::Debug => tracing::debug!(target: "pgbridge::host", tag, %payload),
            LogLevel::Info => tracing::info!(target: "pgbridge::host", tag, %payload),
            LogLevel::Warn => tracing::warn!(target: "pgbridge::host", tag, %payload),
            LogLevel::Error => tracing::error!(target: "pgbridge::host", tag, %payload),
        }
    }

    fn progress(&self, payload: Value) {
        tracing::info!(target: "pgbridge::host", %payload, "progress");
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// A record captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Log { level: LogLevel, payload: Value, tag: String },
    Progress { payload: Value },
}

/// In-memory sink. Payloads are stored after redaction.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<SinkRecord>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().clone()
    }

    /// Payloads of log records at `level`.
    pub fn payloads(&self, level: LogLevel) -> Vec<Value> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                SinkRecord::Log { level: l, payload, .. } if *l == level => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: LogLevel, payload: Value, tag: &str, hidden_keys: &[String]) {
        self.records.lock().push(SinkRecord::Log {
            level,
            payload: redact(payload, hidden_keys),
            tag: tag.to_string(),
        });
    }

    fn progress(&self, payload: Value) {
        self.records.lock().push(SinkRecord::Progress { payload });
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> (Arc<RecordingSink>, DiagnosticLogger) {
        let sink = Arc::new(RecordingSink::new());
        let logger = DiagnosticLogger::new("PostgreSQL", sink.clone());
        (sink, logger)
    }

    #[test]
    fn test_info_merges_extra_and_tags_title() {
        let (sink, logger) = logger();
        logger.info("Connected", json!({ "host": "db.internal", "port": 5432 }));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        match &records[0] {
            SinkRecord::Log { level, payload, tag } => {
                assert_eq!(*level, LogLevel::Info);
                assert_eq!(tag, "PostgreSQL");
                assert_eq!(payload["message"], "Connected");
                assert_eq!(payload["host"], "db.internal");
                assert_eq!(payload["port"], 5432);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn test_info_honors_hidden_keys() {
        let (sink, logger) = logger();
        let logger = logger.with_hidden_keys(["userPassword"]);
        logger.info(
            "Connection info",
            json!({ "userName": "app", "ssh": { "userPassword": "hunter2" }, "userPassword": "x" }),
        );

        let payloads = sink.payloads(LogLevel::Info);
        let payload = &payloads[0];
        assert_eq!(payload["userName"], "app");
        assert_eq!(payload["userPassword"], HIDDEN_VALUE);
        assert_eq!(payload["ssh"]["userPassword"], HIDDEN_VALUE);
    }

    #[test]
    fn test_progress_defaults_names_to_empty() {
        let (sink, logger) = logger();
        logger.progress("Fetching tables", None, None);
        logger.progress("Fetching columns", Some("public"), Some("orders"));

        let records = sink.records();
        assert_eq!(
            records[0],
            SinkRecord::Progress {
                payload: json!({ "message": "Fetching tables", "containerName": "", "entityName": "" })
            }
        );
        assert_eq!(
            records[1],
            SinkRecord::Progress {
                payload: json!({
                    "message": "Fetching columns",
                    "containerName": "public",
                    "entityName": "orders"
                })
            }
        );
    }

    #[test]
    fn test_error_is_flattened_to_plain_record() {
        let (sink, logger) = logger();
        let err = ConnectionError::tunnel_with_source(
            "Failed to connect to SSH server",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
        );
        logger.error(&err);

        let payloads = sink.payloads(LogLevel::Error);
        let payload = &payloads[0];
        assert_eq!(payload["message"], "SSH tunnel error: Failed to connect to SSH server");
        assert_eq!(payload["kind"], "Tunnel");
        assert_eq!(payload["sources"][0], "connection refused");
        assert!(payload["debug"].as_str().unwrap().contains("Tunnel"));
    }

    #[test]
    fn test_error_from_foreign_type_has_no_kind() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let record = serialize_error(&err);
        assert_eq!(record["message"], "disk on fire");
        assert!(record.get("kind").is_none());
        assert_eq!(record["sources"], json!([]));
    }

    #[test]
    fn test_redact_passes_through_without_keys() {
        let value = json!({ "password": "x" });
        assert_eq!(redact(value.clone(), &[]), value);
    }

    #[test]
    fn test_redact_inside_arrays() {
        let hidden = vec!["token".to_string()];
        let value = redact(json!([{ "token": "a" }, { "other": 1 }]), &hidden);
        assert_eq!(value, json!([{ "token": HIDDEN_VALUE }, { "other": 1 }]));
    }

    #[test]
    fn test_render_diagnostics_uses_injected_plugin_version() {
        let (_sink, logger) = logger();
        let report = logger.with_plugin_version("9.9.9").render_diagnostics("2.0.0");
        assert!(report.contains("Application version: 2.0.0\n"));
        assert!(report.contains("Plugin version: 9.9.9\n"));
    }
}
