//! Benchmarks for the pure delivery paths.
//!
//! Run with: cargo bench --bench delivery

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use notifyd::delivery::{canonicalize_phone, convert, MediaKind, RetryExecutor, SendRequest};

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("phone/canonicalize");

    // Already canonical: the common case for API callers
    group.bench_function("canonical", |b| {
        b.iter(|| black_box(canonicalize_phone("9876543210", "91")))
    });

    // Formatted input with separators and a country prefix
    group.bench_function("formatted", |b| {
        b.iter(|| black_box(canonicalize_phone("+91 98765-43210", "91")))
    });

    // Leading zero trunk prefix
    group.bench_function("trunk_prefix", |b| {
        b.iter(|| black_box(canonicalize_phone("09876543210", "91")))
    });

    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let executor = RetryExecutor::new(Duration::from_millis(200), Duration::from_secs(5));

    let mut group = c.benchmark_group("retry/backoff");
    for attempt in [1u32, 3, 6, 20] {
        group.bench_with_input(
            BenchmarkId::from_parameter(attempt),
            &attempt,
            |b, &attempt| b.iter(|| black_box(executor.backoff_delay(attempt))),
        );
    }
    group.finish();
}

fn bench_fallback_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert/to_fallback");

    let text = SendRequest::Text {
        recipients: vec!["9876543210".to_string()],
        template: "order_update".to_string(),
        parameters: vec!["A-1042".to_string(), "tomorrow".to_string()],
    };
    group.bench_function("text", |b| {
        b.iter(|| black_box(convert::to_fallback(&text, "generic_reply")))
    });

    let media = SendRequest::Media {
        recipients: vec!["9876543210".to_string()],
        template: "promo".to_string(),
        parameters: vec!["Asha".to_string()],
        media_kind: MediaKind::Image,
        media_url: "https://cdn.example.com/offer.png".to_string(),
    };
    group.bench_function("media", |b| {
        b.iter(|| black_box(convert::to_fallback(&media, "generic_reply")))
    });

    let otp = SendRequest::Otp {
        recipient: "9876543210".to_string(),
        template: "login_otp".to_string(),
        code: "482913".to_string(),
    };
    group.bench_function("otp", |b| {
        b.iter(|| black_box(convert::to_fallback(&otp, "generic_reply")))
    });

    let reply = SendRequest::Reply {
        recipient: "9876543210".to_string(),
        text: "your order shipped".to_string(),
    };
    group.bench_function("reply", |b| {
        b.iter(|| black_box(convert::to_fallback(&reply, "generic_reply")))
    });

    group.finish();
}

fn bench_bulk_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert/bulk");

    for recipients in [1usize, 100, 1000] {
        let request = SendRequest::Media {
            recipients: (0..recipients)
                .map(|i| format!("98765{:05}", i))
                .collect(),
            template: "promo".to_string(),
            parameters: vec!["Asha".to_string()],
            media_kind: MediaKind::Document,
            media_url: "https://cdn.example.com/terms.pdf".to_string(),
        };

        group.throughput(Throughput::Elements(recipients as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(recipients),
            &request,
            |b, request| b.iter(|| black_box(convert::to_fallback(request, "generic_reply"))),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_canonicalize,
    bench_backoff,
    bench_fallback_conversion,
    bench_bulk_conversion
);
criterion_main!(benches);
