// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{attr_f64, attr_str, attr_u64, event_name, log_records};

fn sample_payload() -> serde_json::Value {
    json!({
        "resourceLogs": [{
            "scopeLogs": [{
                "logRecords": [
                    {
                        "body": {"stringValue": "claude_code.api_request"},
                        "attributes": [
                            {"key": "event.name", "value": {"stringValue": "api_request"}},
                            {"key": "input_tokens", "value": {"intValue": "250"}},
                            {"key": "output_tokens", "value": {"intValue": 80}},
                            {"key": "cost_usd", "value": {"doubleValue": 0.0042}}
                        ]
                    },
                    {
                        "attributes": [
                            {"key": "event.name", "value": {"stringValue": "tool_result"}},
                            {"key": "tool_name", "value": {"stringValue": "Bash"}},
                            {"key": "duration_ms", "value": {"stringValue": "1200"}}
                        ]
                    }
                ]
            }]
        }]
    })
}

#[test]
fn traverses_nested_log_records() {
    let payload = sample_payload();
    let records = log_records(&payload);
    assert_eq!(records.len(), 2);
    assert_eq!(event_name(records[0]), Some("api_request"));
    assert_eq!(event_name(records[1]), Some("tool_result"));
}

#[test]
fn attribute_accessors_handle_otlp_encodings() {
    let payload = sample_payload();
    let records = log_records(&payload);

    // intValue as string (canonical OTLP JSON).
    assert_eq!(attr_u64(records[0], "input_tokens"), Some(250));
    // intValue as a bare number (lenient exporters).
    assert_eq!(attr_u64(records[0], "output_tokens"), Some(80));
    assert_eq!(attr_f64(records[0], "cost_usd"), Some(0.0042));
    assert_eq!(attr_str(records[1], "tool_name"), Some("Bash"));
    // stringValue fallback for numerics.
    assert_eq!(attr_u64(records[1], "duration_ms"), Some(1200));
    assert_eq!(attr_u64(records[0], "missing"), None);
}

#[test]
fn empty_payload_yields_no_records() {
    assert!(log_records(&json!({})).is_empty());
    assert!(log_records(&json!({"resourceLogs": []})).is_empty());
}

mod receiver {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::otel::{OtelCallbacks, OtelReceiver};

    #[tokio::test]
    async fn dispatches_posts_to_callbacks() -> anyhow::Result<()> {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callbacks = OtelCallbacks::default()
            .with_logs(Arc::new(move |payload| sink.lock().push(payload)));

        let receiver = OtelReceiver::start(callbacks).await?;
        let url = format!("{}/v1/logs", receiver.endpoint());

        let client = reqwest::Client::new();
        let resp = client.post(&url).json(&json!({"resourceLogs": []})).send().await?;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await?, "{}");

        assert_eq!(seen.lock().len(), 1);
        receiver.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_json_is_swallowed() -> anyhow::Result<()> {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callbacks = OtelCallbacks::default()
            .with_metrics(Arc::new(move |payload| sink.lock().push(payload)));

        let receiver = OtelReceiver::start(callbacks).await?;
        let url = format!("{}/v1/metrics", receiver.endpoint());

        let client = reqwest::Client::new();
        let resp = client.post(&url).body("not json at all").send().await?;
        assert_eq!(resp.status(), 200);
        assert!(seen.lock().is_empty());

        receiver.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn get_is_method_not_allowed() -> anyhow::Result<()> {
        let receiver = OtelReceiver::start(OtelCallbacks::default()).await?;
        let url = format!("{}/v1/traces", receiver.endpoint());

        let resp = reqwest::Client::new().get(&url).send().await?;
        assert_eq!(resp.status(), 405);

        receiver.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_callbacks_do_not_affect_availability() -> anyhow::Result<()> {
        let receiver = OtelReceiver::start(OtelCallbacks::default()).await?;
        let url = format!("{}/v1/logs", receiver.endpoint());

        let resp = reqwest::Client::new().post(&url).json(&json!({})).send().await?;
        assert_eq!(resp.status(), 200);

        receiver.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn port_unreachable_after_stop() -> anyhow::Result<()> {
        let receiver = OtelReceiver::start(OtelCallbacks::default()).await?;
        let url = format!("{}/v1/logs", receiver.endpoint());
        receiver.stop().await;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()?;
        let result = client.post(&url).json(&json!({})).send().await;
        assert!(result.is_err(), "receiver still reachable after stop");
        Ok(())
    }
}
