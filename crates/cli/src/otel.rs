// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local OTLP-over-HTTP receiver.
//!
//! Binds a random loopback port and dispatches `/v1/{logs,metrics,traces}`
//! POST bodies to per-signal callbacks. Invalid JSON is telemetry noise:
//! logged at debug and dropped, never an error to the exporter. Every
//! request is answered `200 {}` so vendor exporters stay happy.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Callback receiving one parsed OTLP JSON payload.
pub type OtelCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Per-signal callbacks. Any of them may be absent without affecting
/// receiver availability.
#[derive(Clone, Default)]
pub struct OtelCallbacks {
    pub logs: Option<OtelCallback>,
    pub metrics: Option<OtelCallback>,
    pub traces: Option<OtelCallback>,
}

impl OtelCallbacks {
    pub fn with_logs(mut self, cb: OtelCallback) -> Self {
        self.logs = Some(cb);
        self
    }

    pub fn with_metrics(mut self, cb: OtelCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    pub fn with_traces(mut self, cb: OtelCallback) -> Self {
        self.traces = Some(cb);
        self
    }
}

/// Running receiver bound to `127.0.0.1:<port>`.
pub struct OtelReceiver {
    port: u16,
    cancel: CancellationToken,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl OtelReceiver {
    /// Bind `127.0.0.1:0` and start serving.
    pub async fn start(callbacks: OtelCallbacks) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let router = Router::new()
            .route("/v1/logs", post(handle_logs))
            .route("/v1/metrics", post(handle_metrics))
            .route("/v1/traces", post(handle_traces))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(callbacks));

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(e) = serve.await {
                debug!("otel receiver stopped: {e}");
            }
        });

        debug!(port, "otel receiver listening");
        Ok(Self { port, cancel, handle: parking_lot::Mutex::new(Some(handle)) })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// OTLP endpoint base URL for exporter env/flags.
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Stop serving and close the listener. The port becomes unreachable
    /// once this returns.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for OtelReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn handle_logs(
    State(callbacks): State<Arc<OtelCallbacks>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    dispatch(&callbacks.logs, &body, "logs");
    (StatusCode::OK, "{}")
}

async fn handle_metrics(
    State(callbacks): State<Arc<OtelCallbacks>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    dispatch(&callbacks.metrics, &body, "metrics");
    (StatusCode::OK, "{}")
}

async fn handle_traces(
    State(callbacks): State<Arc<OtelCallbacks>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    dispatch(&callbacks.traces, &body, "traces");
    (StatusCode::OK, "{}")
}

fn dispatch(callback: &Option<OtelCallback>, body: &[u8], signal: &str) {
    let Some(callback) = callback else {
        return;
    };
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(payload) => callback(payload),
        Err(e) => debug!(signal, "ignoring invalid otlp body: {e}"),
    }
}

// -- OTLP JSON traversal helpers ----------------------------------------------

/// Collect all log records from an OTLP logs payload
/// (`resourceLogs[].scopeLogs[].logRecords[]`).
pub fn log_records(payload: &serde_json::Value) -> Vec<&serde_json::Value> {
    let mut records = Vec::new();
    let Some(resource_logs) = payload.get("resourceLogs").and_then(|v| v.as_array()) else {
        return records;
    };
    for resource in resource_logs {
        let Some(scope_logs) = resource.get("scopeLogs").and_then(|v| v.as_array()) else {
            continue;
        };
        for scope in scope_logs {
            if let Some(log_records) = scope.get("logRecords").and_then(|v| v.as_array()) {
                records.extend(log_records.iter());
            }
        }
    }
    records
}

/// Look up an attribute value by key in a record's `attributes` array.
pub fn attr<'a>(record: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    let attributes = record.get("attributes")?.as_array()?;
    for entry in attributes {
        if entry.get("key").and_then(|k| k.as_str()) == Some(key) {
            return entry.get("value");
        }
    }
    None
}

/// Attribute as a string (`stringValue`).
pub fn attr_str<'a>(record: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    attr(record, key)?.get("stringValue")?.as_str()
}

/// Attribute as an unsigned integer. OTLP encodes ints as
/// `intValue: "123"` (string) but tolerant exporters send numbers too.
pub fn attr_u64(record: &serde_json::Value, key: &str) -> Option<u64> {
    let value = attr(record, key)?;
    if let Some(int_value) = value.get("intValue") {
        if let Some(s) = int_value.as_str() {
            return s.parse().ok();
        }
        return int_value.as_u64();
    }
    value.get("stringValue")?.as_str()?.parse().ok()
}

/// Attribute as a float (`doubleValue`, with int/string fallbacks).
pub fn attr_f64(record: &serde_json::Value, key: &str) -> Option<f64> {
    let value = attr(record, key)?;
    if let Some(double_value) = value.get("doubleValue") {
        return double_value.as_f64();
    }
    if let Some(int_value) = value.get("intValue") {
        if let Some(s) = int_value.as_str() {
            return s.parse().ok();
        }
        return int_value.as_f64();
    }
    value.get("stringValue")?.as_str()?.parse().ok()
}

/// The record's `event.name` attribute.
pub fn event_name<'a>(record: &'a serde_json::Value) -> Option<&'a str> {
    attr_str(record, "event.name")
}

#[cfg(test)]
#[path = "otel_tests.rs"]
mod tests;
