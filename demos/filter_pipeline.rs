//! Number processing pipeline driven by a producing source stage
//!
//! Pipeline:
//! 1. Source: a background thread produces numbers 1-100 through the stage's producer
//! 2. Filter: keep only even numbers
//! 3. Transform: multiply by 10
//! 4. Flaky: asks for a retry on the first attempt of every multiple of 7
//! 5. Sink: sum everything that comes out
//!
//! Usage: cargo run --example filter_pipeline --release

use parking_lot::Mutex;
use pipeworks::{ComponentFactory, Filter, Map, Message, Passthrough, PipelineBuilder, Producer, Report};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn parse(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Producing numbers 1-100, filtering evens, multiplying by 10, and summing");
    println!();

    let start = Instant::now();
    let producer_slot: Arc<Mutex<Option<Producer>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&producer_slot);
    let sum = Arc::new(AtomicU64::new(0));
    let count = Arc::new(AtomicU64::new(0));
    let (sink_sum, sink_count) = (Arc::clone(&sum), Arc::clone(&count));

    let pipeline = PipelineBuilder::new()
        .stage(ComponentFactory::new("source", move |producer, _| {
            *slot.lock() = Some(producer);
            Ok(Box::new(Passthrough))
        }))
        .stage(ComponentFactory::new("even_filter", |_, _| {
            Ok(Box::new(Filter::new(|msg: &Message| {
                parse(msg.data()).is_some_and(|n| n % 2 == 0)
            })))
        }))
        .stage(
            ComponentFactory::new("multiply_by_10", |_, _| {
                Ok(Box::new(Map::new(|data: Vec<u8>| {
                    let n = parse(&data).ok_or_else(|| "not a number".to_string())?;
                    Ok((n * 10).to_string().into_bytes())
                })))
            })
            .with_pool_size(4),
        )
        .stage(ComponentFactory::new("flaky", |_, _| {
            Ok(Box::new(|msg: &mut Message| {
                let lucky = parse(msg.data()).is_some_and(|n| n % 7 == 0);
                if lucky && msg.attempts() == 0 {
                    Report::retry("first try on a multiple of 7")
                } else {
                    Report::done()
                }
            }))
        }))
        .without_input()
        .max_retries(2)
        .with_sink(move |msg| {
            if let Some(n) = parse(msg.data()) {
                let total = sink_sum.fetch_add(n, Ordering::Relaxed) + n;
                let seen = sink_count.fetch_add(1, Ordering::Relaxed) + 1;
                if seen % 5 == 0 {
                    println!("Running sum: {} (count: {})", total, seen);
                }
            }
        })
        .build()?;

    let producer = producer_slot
        .lock()
        .take()
        .ok_or("source stage did not hand out a producer")?;
    let generator = std::thread::spawn(move || {
        for n in 1..=100u32 {
            if producer.produce(Message::new(n.to_string())).is_err() {
                break;
            }
        }
    });
    generator.join().map_err(|_| "generator thread panicked")?;

    println!("\n{}", pipeline.metrics_summary());
    pipeline.close()?;

    let (sum, count) = (sum.load(Ordering::Relaxed), count.load(Ordering::Relaxed));
    println!("\n=== Final Results ===");
    println!("Total numbers processed: {}", count);
    println!("Sum of all numbers: {}", sum);
    if count > 0 {
        println!("Average: {:.2}", sum as f64 / count as f64);
    }
    println!("\nPipeline execution time: {:.3}s", start.elapsed().as_secs_f64());

    Ok(())
}
