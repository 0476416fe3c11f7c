//! Benchmarks for the per-event pipeline
//!
//! Tests throughput for:
//! - Event filtering of recognized and unrelated names
//! - Fragment extraction from raw verbose trace payloads
//! - XML normalization with and without entity decoding
//! - Raw pass-through of malformed fragments
//!
//! Platform: Cross-platform (synthetic payloads, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use syncml_viewer::config::TextDecoding;
use syncml_viewer::extract::extract_with;
use syncml_viewer::normalize::normalize;
use syncml_viewer::test_utils::{
    SYNCML_MESSAGE, SYNCML_MINIMAL, SYNCML_STATUS_WITH_NESTED_XML, verbose_trace_payload,
};
use syncml_viewer::types::EventName;
use syncml_viewer::{EventFilter, extract};

const DOCUMENTS: [(&str, &str); 3] = [
    ("minimal", SYNCML_MINIMAL),
    ("message", SYNCML_MESSAGE),
    ("nested_xml", SYNCML_STATUS_WITH_NESTED_XML),
];

fn bench_filter(c: &mut Criterion) {
    let filter = EventFilter::default();
    let recognized: Vec<u16> = "omadmsyncmlverbosetrace".encode_utf16().collect();
    let unrelated: Vec<u16> =
        "Microsoft.Windows.DeviceManagement.Heartbeat".encode_utf16().collect();

    let mut group = c.benchmark_group("filter");
    group.bench_function("utf16_recognized", |b| {
        b.iter(|| black_box(filter.accepts(&EventName::Utf16(black_box(&recognized)))))
    });
    group.bench_function("utf16_unrelated", |b| {
        b.iter(|| black_box(filter.accepts(&EventName::Utf16(black_box(&unrelated)))))
    });
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    for (name, xml) in DOCUMENTS {
        let payload = verbose_trace_payload(xml);
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::new("strict", name), &payload, |b, payload| {
            b.iter(|| black_box(extract(black_box(payload))))
        });
        group.bench_with_input(BenchmarkId::new("lossy", name), &payload, |b, payload| {
            b.iter(|| black_box(extract_with(black_box(payload), TextDecoding::Lossy)))
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for (name, xml) in DOCUMENTS {
        group.throughput(Throughput::Bytes(xml.len() as u64));
        group.bench_with_input(BenchmarkId::new("plain", name), xml, |b, xml| {
            b.iter(|| black_box(normalize(black_box(xml), false)))
        });
        group.bench_with_input(BenchmarkId::new("decoded", name), xml, |b, xml| {
            b.iter(|| black_box(normalize(black_box(xml), true)))
        });
    }

    // Truncated document: parse fails and the fragment is returned as is
    let truncated = &SYNCML_MESSAGE[..SYNCML_MESSAGE.len() / 2];
    group.bench_function("malformed_passthrough", |b| {
        b.iter(|| black_box(normalize(black_box(truncated), false)))
    });

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let payload = verbose_trace_payload(SYNCML_MESSAGE);

    c.bench_function("payload_to_output", |b| {
        b.iter(|| {
            let fragment = extract(black_box(&payload)).unwrap();
            black_box(normalize(&fragment, true))
        })
    });
}

criterion_group!(benches, bench_filter, bench_extract, bench_normalize, bench_end_to_end);
criterion_main!(benches);
