//! Word frequency counter pipeline
//!
//! Reads lines from stdin, normalizes them, counts word frequencies and prints
//! the top words when the counting stage is torn down.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)
//!
//! Set `RUST_LOG=pipeworks=debug` to watch the stages drain on shutdown.

use parking_lot::Mutex;
use pipeworks::{ComponentFactory, Map, Message, PipelineBuilder, Report};
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type Counts = Arc<Mutex<HashMap<String, usize>>>;

/// Lowercase the line and replace punctuation with spaces
fn normalize(data: Vec<u8>) -> Result<Vec<u8>, String> {
    let line = String::from_utf8(data).map_err(|e| format!("line is not UTF-8: {e}"))?;
    let cleaned: String = line
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    Ok(cleaned.into_bytes())
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items.into_iter().take(n).collect()
}

fn counter(counts: Counts) -> ComponentFactory {
    let report_counts = Arc::clone(&counts);
    ComponentFactory::new("counter", move |_, attributes| {
        let min_len: usize = attributes
            .get("min_len")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        let counts = Arc::clone(&counts);
        Ok(Box::new(move |msg: &mut Message| {
            let text = String::from_utf8_lossy(msg.data());
            let mut counts = counts.lock();
            for word in text.split_whitespace().filter(|w| w.len() >= min_len) {
                *counts.entry(word.to_string()).or_insert(0) += 1;
            }
            Report::continued()
        }))
    })
    .with_pool_size(2)
    .on_destroy(move || {
        let counts = report_counts.lock();
        println!("\n=== Top 10 Words ({} distinct) ===", counts.len());
        for (i, (word, count)) in top_n(&counts, 10).iter().enumerate() {
            println!("{:2}. {} ({})", i + 1, word, count);
        }
        Ok(())
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let counts: Counts = Arc::new(Mutex::new(HashMap::new()));
    let pipeline = PipelineBuilder::new()
        .stage(
            ComponentFactory::new("normalizer", |_, _| Ok(Box::new(Map::new(normalize))))
                .with_pool_size(2),
        )
        .stage(counter(counts))
        .build()?;

    let input = pipeline.input().ok_or("pipeline has no input")?;
    let reader_thread = std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input.push(Message::new(line)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    reader_thread.join().map_err(|_| "reader thread panicked")?;
    println!("\n{}", pipeline.metrics_summary());
    pipeline.close()?;

    println!("\nProcessing complete!");
    Ok(())
}
