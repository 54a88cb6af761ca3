//! Benchmarks for frame decoding and result aggregation
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use signalflow_rs::protocol::codec::{decode, encode_binary_data};
use signalflow_rs::protocol::{DataMessage, DataPayload, Frame, Message};
use signalflow_rs::{DataValue, ResultAggregator};

/// Eight-byte series ids in the unpadded URL-safe base64 form the service uses
fn series_id(n: u64) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(n.to_be_bytes())
}

fn batch(timestamp: i64, series: u64) -> DataMessage {
    DataMessage {
        logical_timestamp_ms: timestamp,
        data: (0..series)
            .map(|n| DataPayload {
                ts_id: series_id(n),
                value: DataValue::Double(n as f64 * 0.5),
            })
            .collect(),
        max_delay_ms: None,
    }
}

fn json_frame(channel: &str, message: &DataMessage) -> Frame {
    let mut value = serde_json::to_value(message).unwrap();
    value["type"] = "data".into();
    value["channel"] = channel.into();
    Frame::Text(value.to_string())
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_data_batch");

    for series in [10u64, 100, 1000].iter() {
        let message = batch(1_700_000_000_000, *series);
        let binary = encode_binary_data("R1", &message).unwrap();
        let json = json_frame("R1", &message);

        group.throughput(Throughput::Elements(*series));
        group.bench_with_input(BenchmarkId::new("binary", series), &binary, |b, frame| {
            b.iter(|| black_box(decode(frame).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("json", series), &json, |b, frame| {
            b.iter(|| black_box(decode(frame).unwrap()));
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for (series, batches) in [(1u64, 1000i64), (100, 100), (1000, 30)].iter() {
        let messages: Vec<Message> = (0..*batches)
            .map(|i| Message::Data(batch(i * 60_000, *series)))
            .collect();

        group.throughput(Throughput::Elements(*series * *batches as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{}_series", series), batches),
            &messages,
            |b, messages| {
                b.iter(|| {
                    let mut aggregator = ResultAggregator::new();
                    for message in messages {
                        aggregator.ingest(message);
                    }
                    black_box(aggregator.finish())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_aggregate);
criterion_main!(benches);
