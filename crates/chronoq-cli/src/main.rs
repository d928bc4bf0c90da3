//! CLI for chronoq: merge asynchronous timestamped channels into one stream.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chronoq")]
#[command(about = "chronoq: merge asynchronous timestamped channels into one stream")]
#[command(version = chronoq_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run jittered producer threads into a queue and print merged snapshots.
    /// Use --rate to print one weight-biased snapshot per window instead.
    Simulate {
        /// Comma-separated channel names
        #[arg(long, default_value = "camera,imu,gps")]
        channels: String,

        /// Mean interval between pushes on each channel (e.g. "20ms", "1s")
        #[arg(long, default_value = "20ms")]
        interval: String,

        /// Maximum random jitter added to each interval (e.g. "5ms")
        #[arg(long, default_value = "5ms")]
        jitter: String,

        /// Run duration (e.g. "10s", "1m"); default: until Ctrl+C
        #[arg(long)]
        duration: Option<String>,

        /// Enable windowed sampling at this many windows per second
        #[arg(long)]
        rate: Option<u32>,

        /// Sampling weights as channel:weight pairs (e.g. "camera:2,imu:1")
        #[arg(long)]
        weights: Option<String>,

        /// Load channels and sampling settings from a JSON config file
        #[arg(long)]
        config: Option<String>,

        /// Output format
        #[arg(long, default_value = "table", value_parser = ["table", "json"])]
        format: String,

        /// Print the queue report when the run ends
        #[arg(long)]
        report: bool,
    },

    /// Measure concurrent push and pop throughput.
    Bench {
        /// Number of producer threads
        #[arg(long, default_value = "4")]
        producers: usize,

        /// Number of channels (producers are spread across them)
        #[arg(long, default_value = "4")]
        channels: usize,

        /// Items pushed by each producer
        #[arg(long, default_value = "100000")]
        items: usize,

        /// Write machine-readable results as JSON
        #[arg(long)]
        output: Option<String>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            channels,
            interval,
            jitter,
            duration,
            rate,
            weights,
            config,
            format,
            report,
        } => commands::simulate::run(commands::simulate::SimulateCommandConfig {
            channels: &channels,
            interval: &interval,
            jitter: &jitter,
            duration: duration.as_deref(),
            rate,
            weights: weights.as_deref(),
            config_path: config.as_deref(),
            json: format == "json",
            print_report: report,
        }),
        Commands::Bench {
            producers,
            channels,
            items,
            output,
        } => commands::bench::run(producers, channels, items, output.as_deref()),
    }
}
