//! Resilience Benchmarks
//!
//! Hot-path costs of classification, backoff, redaction and context
//! propagation.
//!
//! Run with: cargo bench --bench resilience_benchmarks

use courier::{CorrelationContext, FailureKind, propagation};
use courier_audit::{MaskingConfig, Redactor};
use courier_http_client::{
    RawOutcome, RetryConfig, TransportError, classify, decide, is_safe_to_retry,
    parse_retry_after,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::{Duration, SystemTime};

// =============================================================================
// Classification and Backoff
// =============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for status in [200u16, 404, 429, 503] {
        group.bench_with_input(BenchmarkId::new("status", status), &status, |b, &status| {
            b.iter(|| classify(black_box(&RawOutcome::Status(status))))
        });
    }

    let refused = TransportError::connect("connection refused");
    group.bench_function("transport_connect", |b| {
        b.iter(|| classify(black_box(&RawOutcome::Transport(&refused))))
    });

    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let config = RetryConfig::exponential(10, Duration::from_millis(100));

    for attempt in [1, 3, 5, 9] {
        group.bench_with_input(BenchmarkId::new("decide", attempt), &attempt, |b, &attempt| {
            b.iter(|| decide(black_box(FailureKind::ServerError), attempt, &config))
        });
    }

    group.bench_function("safe_to_retry", |b| {
        b.iter(|| is_safe_to_retry(black_box(FailureKind::Timeout), black_box(false), true))
    });

    let now = SystemTime::now();
    group.bench_function("retry_after_seconds", |b| {
        b.iter(|| parse_retry_after(black_box("120"), now))
    });
    group.bench_function("retry_after_date", |b| {
        b.iter(|| parse_retry_after(black_box("Wed, 21 Oct 2037 07:28:00 GMT"), now))
    });

    group.finish();
}

// =============================================================================
// Redaction
// =============================================================================

fn bench_redaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("redaction");
    let redactor = Redactor::new(MaskingConfig::default());

    let json = br#"{"user":"ada","password":"hunter2","card":{"creditCard":"4111111111111111"}}"#;
    group.bench_function("json_body", |b| b.iter(|| redactor.summarize(black_box(json))));

    let form = b"user=ada&password=hunter2&token=abc123&note=call%20me";
    group.bench_function("form_body", |b| b.iter(|| redactor.summarize(black_box(form))));

    group.finish();
}

// =============================================================================
// Context Propagation
// =============================================================================

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation");

    group.bench_function("new_context", |b| b.iter(CorrelationContext::new));

    let ctx = CorrelationContext::with_id("bench-id");
    group.bench_function("sync_scope", |b| {
        b.iter(|| propagation::sync_scope(&ctx, || black_box(propagation::current())))
    });

    group.bench_function("decorate_and_run", |b| {
        b.iter(|| {
            let task = propagation::sync_scope(&ctx, || propagation::decorate(propagation::current));
            black_box(task())
        })
    });

    group.finish();
}

criterion_group!(
    resilience_benches,
    bench_classify,
    bench_backoff,
    bench_redaction,
    bench_propagation,
);
criterion_main!(resilience_benches);
