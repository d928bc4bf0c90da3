//! `chronoq bench`: concurrent push and pop throughput.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use chronoq_core::{ManualClock, QueueConfig, TemporalQueue};
use serde::Serialize;

use super::fail;

#[derive(Debug, Serialize)]
struct PhaseResult {
    items: usize,
    seconds: f64,
    items_per_sec: f64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    version: &'static str,
    producers: usize,
    channels: usize,
    items_per_producer: usize,
    push: PhaseResult,
    pop: PhaseResult,
    mixed: PhaseResult,
    snapshots: usize,
}

fn phase(items: usize, started: Instant) -> PhaseResult {
    let seconds = started.elapsed().as_secs_f64();
    PhaseResult {
        items,
        seconds,
        items_per_sec: if seconds > 0.0 { items as f64 / seconds } else { 0.0 },
    }
}

fn build_queue(channels: &[String]) -> TemporalQueue<u64> {
    let config = QueueConfig {
        channels: channels.to_vec(),
        ..QueueConfig::default()
    };
    // Every timestamp is due immediately.
    TemporalQueue::with_clock(config, Arc::new(ManualClock::new(i64::MAX)))
        .unwrap_or_else(|e| fail(&e.to_string()))
}

fn push_all(queue: &TemporalQueue<u64>, channels: &[String], producers: usize, items: usize) {
    thread::scope(|s| {
        for p in 0..producers {
            let name = &channels[p % channels.len()];
            s.spawn(move || {
                for i in 0..items {
                    let ts = i64::try_from(i).unwrap_or(i64::MAX);
                    queue.push(name, i as u64, ts);
                }
            });
        }
    });
}

/// Run the bench command.
pub fn run(producers: usize, channels: usize, items: usize, output_path: Option<&str>) {
    if producers == 0 || channels == 0 {
        fail("--producers and --channels must be at least 1");
    }
    let names: Vec<String> = (0..channels).map(|c| format!("ch{c}")).collect();
    let total = producers * items;

    println!("Benchmarking temporal merge");
    println!("  Producers: {producers}");
    println!("  Channels:  {channels}");
    println!("  Items:     {items} per producer ({total} total)");
    println!();

    // Phase 1: concurrent pushes only.
    let queue = build_queue(&names);
    let started = Instant::now();
    push_all(&queue, &names, producers, items);
    let push = phase(total, started);

    // Phase 2: drain everything on one consumer.
    let started = Instant::now();
    let mut popped = 0usize;
    let mut snapshots = 0usize;
    while let Some(snapshot) = queue.pop() {
        popped += snapshot.len();
        snapshots += 1;
    }
    let pop = phase(popped, started);
    if popped != total {
        log::warn!("popped {popped} of {total} items");
    }

    // Phase 3: producers and a consumer running together.
    let queue = build_queue(&names);
    let consumed = AtomicUsize::new(0);
    let done = AtomicBool::new(false);
    let started = Instant::now();
    thread::scope(|s| {
        s.spawn(|| {
            loop {
                match queue.pop() {
                    Some(snapshot) => {
                        consumed.fetch_add(snapshot.len(), Ordering::Relaxed);
                    }
                    None if done.load(Ordering::SeqCst) => break,
                    None => thread::yield_now(),
                }
            }
        });
        push_all(&queue, &names, producers, items);
        done.store(true, Ordering::SeqCst);
    });
    let mixed = phase(consumed.load(Ordering::Relaxed), started);

    println!("  {:<8} {:>12} {:>10} {:>14}", "Phase", "Items", "Seconds", "Items/s");
    println!("  {}", "─".repeat(48));
    for (label, r) in [("push", &push), ("pop", &pop), ("mixed", &mixed)] {
        println!(
            "  {:<8} {:>12} {:>10.3} {:>14.0}",
            label, r.items, r.seconds, r.items_per_sec
        );
    }
    println!();
    println!(
        "  {snapshots} snapshots popped ({:.2} items each)",
        if snapshots > 0 { popped as f64 / snapshots as f64 } else { 0.0 }
    );

    if let Some(path) = output_path {
        let report = BenchReport {
            version: chronoq_core::VERSION,
            producers,
            channels,
            items_per_producer: items,
            push,
            pop,
            mixed,
            snapshots,
        };
        let json = serde_json::to_string_pretty(&report).unwrap_or_else(|e| fail(&e.to_string()));
        match std::fs::write(path, json) {
            Ok(()) => println!("\nResults written to {path}"),
            Err(e) => fail(&format!("failed to write {path}: {e}")),
        }
    }
}
