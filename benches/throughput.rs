use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeworks::{ComponentFactory, Message, Passthrough, PipelineBuilder};
use std::time::Duration;

fn run_passthrough(stages: usize, pool_size: usize, messages: usize, payload: usize) {
    let mut builder = PipelineBuilder::new().input_capacity(1000);
    for i in 0..stages {
        builder = builder.stage(
            ComponentFactory::cloning(format!("stage{}", i + 1), Passthrough)
                .with_pool_size(pool_size)
                .with_channel_size(1000),
        );
    }
    let pipeline = builder.build().expect("Build failed");

    for i in 0..messages {
        let data = vec![i as u8; payload];
        let _ = pipeline.push(black_box(Message::new(data)));
    }

    pipeline.close().expect("Close failed");
}

fn benchmark_single_stage_throughput(c: &mut Criterion) {
    c.bench_function("single_stage_1000_msgs", |b| {
        b.iter(|| run_passthrough(1, 1, 1000, 64));
    });
}

fn benchmark_three_stage_throughput(c: &mut Criterion) {
    c.bench_function("three_stage_1000_msgs", |b| {
        b.iter(|| run_passthrough(3, 1, 1000, 64));
    });
}

fn benchmark_pooled_throughput(c: &mut Criterion) {
    c.bench_function("pooled_two_stage_5000_msgs", |b| {
        b.iter(|| run_passthrough(2, 4, 5000, 32));
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_single_stage_throughput, benchmark_three_stage_throughput, benchmark_pooled_throughput
);
criterion_main!(benches);
