// Copyright 2025 Stagehand Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Batch Processing Benchmarks
//!
//! CPU-side cost of a batch before any network I/O:
//! - Flattening and routing raw events into table batches
//! - Encoding a batch into the staging format
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench --package stagehand-benches --bench batch_processing
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use stagehand_core::event::RawEvent;
use stagehand_core::processor::{FlatProcessor, Processor};
use std::collections::HashSet;

/// Events spread over four tables with nested objects to flatten.
fn create_sample_events(count: usize) -> Vec<RawEvent> {
    (0..count)
        .map(|i| {
            let table = ["pageview", "click", "signup", "purchase"][i % 4];
            json!({
                "event_type": table,
                "id": i,
                "user": {"id": format!("user_{}", i % 1000), "plan": "pro"},
                "url": format!("/page/{}", i % 50),
                "value": i as f64 * 1.5,
                "t": "2024-01-01T10:00:00Z",
                "tags": ["a", "b|c"],
            })
            .as_object()
            .cloned()
            .unwrap_or_default()
        })
        .collect()
}

/// Events whose payload size varies from tiny to large.
fn create_variable_size_events(count: usize) -> Vec<RawEvent> {
    (0..count)
        .map(|i| {
            let payload_size = match i % 4 {
                0 => 100,
                1 => 500,
                2 => 1000,
                _ => 50,
            };
            json!({"id": i, "data": "x".repeat(payload_size)})
                .as_object()
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

fn processor() -> FlatProcessor {
    FlatProcessor::builder()
        .table_name_field("event_type")
        .build()
}

/// Benchmark: flattening and routing
fn bench_process_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_events");
    let processor = processor();
    let uploaded = HashSet::new();

    for size in [100, 1000, 10000] {
        let events = create_sample_events(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                black_box(
                    processor
                        .process_events("bench.dat", events, &uploaded, false)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

/// Benchmark: keeping the original event of every row
fn bench_process_with_copy_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_with_copy_events");
    let processor = processor();
    let uploaded = HashSet::new();
    let events = create_sample_events(1000);

    group.throughput(Throughput::Elements(1000));
    for need_copy_event in [false, true] {
        group.bench_with_input(
            BenchmarkId::from_parameter(need_copy_event),
            &need_copy_event,
            |b, &need_copy_event| {
                b.iter(|| {
                    black_box(
                        processor
                            .process_events("bench.dat", &events, &uploaded, need_copy_event)
                            .unwrap(),
                    )
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: encoding batches into the staging format
fn bench_encode_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_payload");
    let processor = FlatProcessor::default();
    let uploaded = HashSet::new();

    for size in [100, 1000, 10000] {
        let events = create_variable_size_events(size);
        let result = processor
            .process_events("bench.dat", &events, &uploaded, false)
            .unwrap();
        let batch = &result.batches[0];
        let header: Vec<String> = batch.schema.columns.keys().cloned().collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), batch, |b, batch| {
            b.iter(|| black_box(batch.payload_with_header(&header).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_process_events,
    bench_process_with_copy_events,
    bench_encode_payload
);
criterion_main!(benches);
