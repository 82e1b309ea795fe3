use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use sensorgen::{
    Dispatcher, Event, MemoryBroker, ProducerSettings, completion_channel, sensor_id,
};
use std::time::{Duration, Instant};
use tokio::runtime::Builder;

// Events encoded or submitted per benchmark iteration.
const TOTAL_EVENTS: usize = 4096;

// Distinct sensor keys cycled through, so records spread over partitions.
const SENSORS: usize = 64;

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("event/encode");
    group.throughput(Throughput::Elements(TOTAL_EVENTS as u64));

    let events: Vec<Event> = (0..TOTAL_EVENTS)
        .map(|i| Event::new(sensor_id(i % SENSORS), 20.0 + i as f64 * 0.01))
        .collect();

    group.bench_function(format!("elems/{TOTAL_EVENTS}"), |b| {
        b.iter(|| {
            for event in &events {
                black_box(event.encode().unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_new_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("event/new");
    group.throughput(Throughput::Elements(TOTAL_EVENTS as u64));

    group.bench_function(format!("elems/{TOTAL_EVENTS}"), |b| {
        b.iter(|| {
            for i in 0..TOTAL_EVENTS {
                black_box(Event::new("sensor_1", i as f64));
            }
        });
    });

    group.finish();
}

/// Submit path against the in-memory broker. The queue is sized so that a
/// whole iteration fits; the flusher drains it on the runtime's workers.
fn benchmark_submit(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let broker = MemoryBroker::new(8).unwrap();
    let settings = ProducerSettings {
        queue_capacity: TOTAL_EVENTS * 4,
        flush_messages: 1_000,
        flush_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let (sink, streams) = completion_channel();
    let connection = broker.connect(&settings, sink).unwrap();
    let dispatcher = Dispatcher::new(connection, streams, "bench");

    let events: Vec<Event> = (0..TOTAL_EVENTS)
        .map(|i| Event::new(sensor_id(i % SENSORS), 50.0))
        .collect();

    let mut group = c.benchmark_group("dispatcher/submit");
    group.throughput(Throughput::Elements(TOTAL_EVENTS as u64));

    group.bench_function(format!("elems/{TOTAL_EVENTS}"), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            for _ in 0..iters {
                let start = Instant::now();
                for event in &events {
                    let _ = black_box(dispatcher.submit(event));
                }
                elapsed += start.elapsed();

                // Let the flusher catch up outside the timed section.
                while dispatcher.stats().in_flight() > 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            elapsed
        });
    });

    group.finish();

    let stats = runtime.block_on(dispatcher.close(Duration::from_secs(5)));
    black_box(stats);
}

criterion_group!(
    benches,
    benchmark_new_event,
    benchmark_encode,
    benchmark_submit,
);
criterion_main!(benches);
