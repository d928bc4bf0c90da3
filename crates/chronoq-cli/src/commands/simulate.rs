//! `chronoq simulate`: jittered producers feeding one queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chronoq_core::{QueueReport, SamplingConfig, Snapshot, TemporalQueue, now_ns};
use rand::Rng;
use serde::Serialize;

use super::{fail, load_config, parse_channels, parse_duration, parse_weights};

pub struct SimulateCommandConfig<'a> {
    pub channels: &'a str,
    pub interval: &'a str,
    pub jitter: &'a str,
    pub duration: Option<&'a str>,
    pub rate: Option<u32>,
    pub weights: Option<&'a str>,
    pub config_path: Option<&'a str>,
    pub json: bool,
    pub print_report: bool,
}

/// One simulated reading.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub seq: u64,
    pub value: f64,
}

/// Run the simulate command.
pub fn run(cmd: SimulateCommandConfig<'_>) {
    let interval = parse_duration(cmd.interval).unwrap_or_else(|e| fail(&e));
    let jitter = parse_duration(cmd.jitter).unwrap_or_else(|e| fail(&e));
    let max_duration = cmd
        .duration
        .map(|d| parse_duration(d).unwrap_or_else(|e| fail(&e)));

    let mut config = load_config(cmd.config_path).unwrap_or_else(|e| fail(&e));
    for name in parse_channels(cmd.channels) {
        if !config.channels.contains(&name) {
            config.channels.push(name);
        }
    }
    if config.channels.is_empty() {
        fail("no channels to simulate");
    }
    if let Some(rate) = cmd.rate {
        let weights = match cmd.weights {
            Some(w) => parse_weights(w).unwrap_or_else(|e| fail(&e)),
            None => config
                .sampling
                .as_ref()
                .map(|s| s.weights.clone())
                .unwrap_or_default(),
        };
        config.sampling = Some(SamplingConfig { rate, weights });
    }

    let channels = config.channels.clone();
    let sampling = config.sampling.clone();
    let queue: TemporalQueue<Reading> =
        TemporalQueue::with_config(config).unwrap_or_else(|e| fail(&e.to_string()));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Ctrl+C handler not installed: {e}");
    }

    if !cmd.json {
        println!("Simulating {} channels", channels.len());
        println!("  Channels:  {}", channels.join(", "));
        println!(
            "  Interval:  {}ms ± {}ms",
            interval.as_millis(),
            jitter.as_millis()
        );
        match &sampling {
            Some(s) => println!("  Sampling:  {} windows/s", s.rate),
            None => println!("  Sampling:  off"),
        }
        match max_duration {
            Some(d) => println!("  Duration:  {:.1}s", d.as_secs_f64()),
            None => println!("  Duration:  until Ctrl+C"),
        }
        println!();
    }

    let start = Instant::now();
    let mut emitted = 0u64;
    thread::scope(|s| {
        for name in &channels {
            let queue = &queue;
            let running = &running;
            s.spawn(move || produce(queue, name, interval, jitter, running));
        }

        while running.load(Ordering::SeqCst) {
            if max_duration.is_some_and(|max| start.elapsed() >= max) {
                running.store(false, Ordering::SeqCst);
                break;
            }
            match queue.pop() {
                Some(snapshot) => {
                    print_snapshot(&snapshot, cmd.json);
                    emitted += 1;
                }
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
    });

    queue.close_sample();
    while let Some(snapshot) = queue.pop() {
        print_snapshot(&snapshot, cmd.json);
        emitted += 1;
    }

    if !cmd.json {
        println!();
        println!(
            "{emitted} snapshots in {:.1}s",
            start.elapsed().as_secs_f64()
        );
    }
    if cmd.print_report {
        print_report(&queue.report(), cmd.json);
    }
}

fn produce(
    queue: &TemporalQueue<Reading>,
    name: &str,
    interval: Duration,
    jitter: Duration,
    running: &AtomicBool,
) {
    let mut rng = rand::rng();
    let jitter_us = u64::try_from(jitter.as_micros()).unwrap_or(u64::MAX);
    let mut seq = 0u64;
    while running.load(Ordering::SeqCst) {
        let extra = if jitter_us == 0 {
            0
        } else {
            rng.random_range(0..=jitter_us)
        };
        thread::sleep(interval + Duration::from_micros(extra));
        let reading = Reading {
            seq,
            value: rng.random::<f64>(),
        };
        queue.push(name, reading, now_ns());
        seq += 1;
    }
    log::debug!("producer `{name}` stopped after {seq} readings");
}

fn print_snapshot(snapshot: &Snapshot<Reading>, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("failed to encode snapshot: {e}"),
        }
        return;
    }
    let cells: Vec<String> = snapshot
        .values
        .iter()
        .map(|(name, r)| format!("{name}=#{}({:.3})", r.seq, r.value))
        .collect();
    println!("  {:>20}  {}", snapshot.timestamp, cells.join("  "));
}

fn print_report(report: &QueueReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("failed to encode report: {e}"),
        }
        return;
    }
    println!();
    println!(
        "  {:<16} {:>9} {:>9} {:>9} {:>9}  {}",
        "Channel", "Pushed", "Popped", "Dropped", "Buffered", "State"
    );
    println!("  {}", "─".repeat(66));
    for c in &report.channels {
        println!(
            "  {:<16} {:>9} {:>9} {:>9} {:>9}  {}",
            c.name,
            c.pushed,
            c.popped,
            c.dropped,
            c.buffered,
            if c.closing { "closing" } else { "open" }
        );
    }
    println!();
    println!("  Unknown-channel drops: {}", report.dropped_unknown);
    if let Some(w) = report.window_ns {
        println!("  Sampling window:       {:.1}ms", w as f64 / 1e6);
    }
    println!("  Clock:                 {}", report.clock);
}
