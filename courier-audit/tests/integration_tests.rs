//! Integration tests for courier-audit

use bytes::Bytes;
use chrono::Utc;
use courier_audit::*;
use courier_core::FailureKind;

fn attempt(n: u32, outcome: AttemptOutcome, status: Option<u16>) -> CallAttempt {
    CallAttempt {
        attempt_number: n,
        correlation_id: Some("req-7".to_string()),
        method: "POST".to_string(),
        uri: "https://payments.internal/charge".to_string(),
        started_at: Utc::now(),
        duration_ms: 12,
        outcome,
        http_status: status,
        error: None,
    }
}

#[tokio::test]
async fn test_full_event_through_pipeline() {
    let sink = MemorySink::new();
    let pipeline = AuditPipeline::builder()
        .sink(sink.clone())
        .config(&AuditConfig::default())
        .spawn();

    let event = AuditEvent::new("POST", "https://payments.internal/charge")
        .correlation_id("req-7")
        .attempts(vec![
            attempt(1, AttemptOutcome::Failed(FailureKind::ServerError), Some(503)),
            attempt(2, AttemptOutcome::Success, Some(200)),
        ])
        .final_outcome(AttemptOutcome::Success)
        .status_code(200)
        .total_duration_ms(1030)
        .with_request_body(Bytes::from_static(
            br#"{"creditCard":"4111111111111111","note":"call 555-123-4567","email":"jane@corp.io"}"#,
        ))
        .with_response_body(Bytes::from_static(br#"{"token":"tok_abc","status":"ok"}"#));

    pipeline.record(event);
    pipeline.flush().await;

    let events = sink.get_events().await;
    assert_eq!(events.len(), 1);

    let recorded = &events[0];
    assert_eq!(recorded.attempt_count(), 2);
    assert!(recorded
        .attempts
        .iter()
        .all(|a| a.correlation_id.as_deref() == Some("req-7")));

    let request = recorded.request_summary.as_deref().unwrap();
    assert!(request.contains(r#""creditCard":"***""#));
    assert!(request.contains("call ***"));
    assert!(request.contains("***@corp.io"));

    let response = recorded.response_summary.as_deref().unwrap();
    assert!(response.contains(r#""token":"***""#));
    assert!(response.contains(r#""status":"ok""#));
}

#[tokio::test]
async fn test_summary_length_bound() {
    let sink = MemorySink::new();
    let config = AuditConfig {
        max_body_length: 32,
        ..AuditConfig::default()
    };
    let pipeline = AuditPipeline::builder()
        .sink(sink.clone())
        .config(&config)
        .spawn();

    let body = format!(r#"{{"user":"x","bio":"{}"}}"#, "a".repeat(500));
    pipeline.record(AuditEvent::new("PUT", "http://svc/profile").with_request_body(Bytes::from(body)));
    pipeline.flush().await;

    let summary = sink.get_events().await[0].request_summary.clone().unwrap();
    assert!(summary.ends_with(TRUNCATION_MARKER));
    assert!(summary.len() <= 32 + TRUNCATION_MARKER.len());
}

#[tokio::test]
async fn test_file_sink_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let pipeline = AuditPipeline::builder().sink(FileSink::new(&path)).spawn();
    pipeline.record(AuditEvent::new("GET", "http://svc/a").correlation_id("one"));
    pipeline.record(AuditEvent::new("GET", "http://svc/b").correlation_id("two"));
    pipeline.flush().await;

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let ids: Vec<String> = contents
        .lines()
        .map(|line| serde_json::from_str::<AuditEvent>(line).unwrap())
        .filter_map(|e| e.correlation_id)
        .collect();
    assert_eq!(ids, vec!["one", "two"]);
}

#[test]
fn test_pipeline_on_blocking_runtime() {
    let sink = MemorySink::new();

    let count = tokio_test::block_on(async {
        let pipeline = AuditPipeline::builder().sink(sink.clone()).spawn();
        pipeline.record(AuditEvent::new("DELETE", "http://svc/item/1"));
        pipeline.flush().await;
        sink.get_events().await.len()
    });

    assert_eq!(count, 1);
}

#[test]
fn test_masking_defaults() {
    let config = MaskingConfig::default();
    let data = serde_json::json!({
        "username": "alice",
        "password": "secret123",
        "Authorization": "Bearer abc"
    });

    let masked = mask_json(&data, &config);
    assert_eq!(masked["username"], "alice");
    assert_eq!(masked["password"], "***");
    assert_eq!(masked["Authorization"], "***");
}
