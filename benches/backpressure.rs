use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeworks::{ComponentFactory, Map, Message, Passthrough, PipelineBuilder, Report};
use std::time::Duration;

fn slow_consumer(name: &str, pool_size: usize) -> ComponentFactory {
    ComponentFactory::new(name, |_, _| {
        Ok(Box::new(Map::new(|data: Vec<u8>| {
            std::thread::sleep(Duration::from_micros(100));
            Ok(data)
        })))
    })
    .with_pool_size(pool_size)
}

fn benchmark_backpressure_slow_consumer(c: &mut Criterion) {
    c.bench_function("backpressure_slow_consumer_1000_msgs", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .stage(ComponentFactory::cloning("producer", Passthrough).with_channel_size(10))
                .stage(slow_consumer("consumer", 1))
                .build()
                .expect("Build failed");

            for i in 0..1000 {
                let _ = pipeline.push(black_box(Message::new(vec![i as u8; 64])));
            }
            pipeline.close().expect("Close failed");
        });
    });
}

fn benchmark_wide_consumer_pool(c: &mut Criterion) {
    c.bench_function("wide_pool_slow_consumer_1000_msgs", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .stage(ComponentFactory::cloning("producer", Passthrough).with_channel_size(10))
                .stage(slow_consumer("consumer", 8))
                .build()
                .expect("Build failed");

            for i in 0..1000 {
                let _ = pipeline.push(black_box(Message::new(vec![i as u8; 64])));
            }
            pipeline.close().expect("Close failed");
        });
    });
}

fn benchmark_retry_heavy_load(c: &mut Criterion) {
    c.bench_function("retry_every_message_once_2000_msgs", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .stage(
                    ComponentFactory::new("retry_once", |_, _| {
                        Ok(Box::new(|msg: &mut Message| {
                            if msg.attempts() == 0 {
                                Report::retry("first attempt")
                            } else {
                                Report::done()
                            }
                        }))
                    })
                    .with_pool_size(2),
                )
                .build()
                .expect("Build failed");

            for i in 0..2000 {
                let _ = pipeline.push(black_box(Message::new(vec![i as u8; 64])));
            }
            pipeline.close().expect("Close failed");
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_backpressure_slow_consumer, benchmark_wide_consumer_pool, benchmark_retry_heavy_load
);
criterion_main!(benches);
