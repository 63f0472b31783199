//! Viewbench command line runner.
//!
//! Usage:
//!   viewbench                                   # defaults: 10k rows, 100 wps, 10 readers
//!   viewbench --rows 50000 --wps 500 --readers 32
//!   viewbench --format json --backends 2 --read-latency-us 800
//!   viewbench --fail-fast -vv

use std::{pin::pin, process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use futures::StreamExt;
use tracing::Level;
use viewbench::{
    BenchmarkConfig, JsonReporter, MemoryBackend, Reporter, Suite, TextReporter,
    backend::Latency,
};

#[derive(Parser, Debug)]
#[command(name = "viewbench", about = "Benchmark view-event storage backends")]
struct Cli {
    /// Rows loaded before any measurement.
    #[arg(long, default_value_t = 10_000)]
    rows: usize,

    /// Target rate of the background write stream, in rows per second.
    #[arg(long, default_value_t = 100.0)]
    wps: f64,

    /// Concurrent readers in the parallel test.
    #[arg(long, default_value_t = 10)]
    readers: usize,

    /// Rows in the timed bulk insert.
    #[arg(long, default_value_t = 100_000)]
    static_rows: usize,

    /// Calls per read measurement.
    #[arg(long, default_value_t = 100)]
    repeats: u32,

    /// Pause after loading data, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    settle_ms: u64,

    /// Head start given to the write stream, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    warm_up_ms: u64,

    /// Longest the write stream may keep producing, in seconds.
    #[arg(long, default_value_t = 10)]
    produce_secs: u64,

    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Stop at the first backend that fails.
    #[arg(long)]
    fail_fast: bool,

    /// Number of in-memory backends to register.
    #[arg(long, default_value_t = 1)]
    backends: usize,

    /// Artificial latency per inserted row, in microseconds.
    #[arg(long, default_value_t = 0)]
    insert_latency_us: u64,

    /// Artificial latency per read, in microseconds.
    #[arg(long, default_value_t = 0)]
    read_latency_us: u64,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Every reader plus the producer and the consumer get a thread of their own.
    let threads = num_cpus::get().max(cli.readers + 2);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let config = BenchmarkConfig::builder()
        .rows_count(cli.rows)
        .writes_per_second(cli.wps)
        .readers_count(cli.readers)
        .static_rows(cli.static_rows)
        .repeats(cli.repeats)
        .settle(Duration::from_millis(cli.settle_ms))
        .warm_up(Duration::from_millis(cli.warm_up_ms))
        .max_producing_time(Duration::from_secs(cli.produce_secs))
        .seed(cli.seed)
        .build();

    let mut suite = match Suite::new(config) {
        Ok(suite) => suite,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let latency = Latency {
        insert_per_row: Duration::from_micros(cli.insert_latency_us),
        read: Duration::from_micros(cli.read_latency_us),
        ..Latency::default()
    };
    for i in 0..cli.backends {
        let name = if cli.backends == 1 {
            "memory".to_string()
        } else {
            format!("memory-{}", i + 1)
        };
        suite.register(MemoryBackend::builder().name(name).latency(latency).build());
    }

    tracing::info!(
        "Benchmarking {} with {} rows, {} wps, {} readers",
        suite.backends().collect::<Vec<_>>().join(", "),
        cli.rows,
        cli.wps,
        cli.readers
    );

    let text = TextReporter::new(cli.static_rows);
    let mut failures = 0;
    let mut results = pin!(suite.run());
    while let Some(result) = results.next().await {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("{e}");
                failures += 1;
                if cli.fail_fast {
                    break;
                }
                continue;
            }
        };
        let reported = match cli.format {
            Format::Text => text.report(&record).await,
            Format::Json => JsonReporter.report(&record).await,
        };
        if let Err(e) = reported {
            tracing::error!("Failed to report {}: {e}", record.backend);
            return ExitCode::FAILURE;
        }
    }

    if failures > 0 {
        tracing::error!("{failures} backend(s) failed");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
