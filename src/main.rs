//! SignalFlow runner - Main Entry Point
//!
//! Executes one SignalFlow program over a trailing time window, collects the
//! results and prints a summary per time series.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use signalflow_rs::config::ENV_TOKEN;
use signalflow_rs::{Client, ClientConfig, CollectedResult, ExecuteRequest};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Run a SignalFlow program and print the collected time series
#[derive(Debug, Parser)]
#[command(name = "signalflow-run", version, about)]
struct Args {
    /// SignalFlow program to execute
    #[arg(default_value = "data('demo.trans.latency').publish()")]
    program: String,

    /// Length of the trailing window, in minutes (at most one year)
    #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_MINUTES))]
    window: i64,

    /// Resolution in milliseconds
    #[arg(short, long, default_value_t = 60_000)]
    resolution: i64,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Realm, overriding configuration and environment
    #[arg(long)]
    realm: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print every point, not just the per-series summary
    #[arg(long)]
    points: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging(args.log_file.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(args))
}

/// Initialize logging, returning the guard that flushes the log file
fn init_logging(
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,signalflow_rs=debug"));

    match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log file {:?} has no file name", path))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Ok(None)
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let base = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load configuration from {:?}", path))?,
        None => ClientConfig::load_or_default(ClientConfig::default_path()),
    };
    let mut config = base.apply_env();
    if let Some(realm) = &args.realm {
        config.realm = realm.clone();
    }
    if config.token.is_empty() {
        anyhow::bail!(
            "no access token; set {} or add `token` to the configuration file",
            ENV_TOKEN
        );
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    tracing::info!("Starting SignalFlow runner ({:?})", config);

    let client = Client::with_config(config).context("invalid client configuration")?;

    let end = Utc::now().timestamp_millis();
    let start = window_start(end, args.window)?;
    println!(
        "Executing SignalFlow program from {} to {}",
        iso(start),
        iso(end)
    );
    println!("Program: {}", args.program);

    let outcome = execute_and_collect(&client, &args, start, end).await;

    println!("Closing SignalFlow client...");
    if let Err(e) = client.close().await {
        tracing::error!("Error closing SignalFlow client: {}", e);
    }

    let result = outcome?;
    print_result(&result, args.points);
    Ok(())
}

/// Start of a trailing window of `minutes` ending at `end`
fn window_start(end: i64, minutes: i64) -> anyhow::Result<i64> {
    minutes
        .checked_mul(60 * 1000)
        .and_then(|span| end.checked_sub(span))
        .with_context(|| format!("window of {} minutes is out of range", minutes))
}

async fn execute_and_collect(
    client: &Client,
    args: &Args,
    start: i64,
    end: i64,
) -> anyhow::Result<CollectedResult> {
    let request = ExecuteRequest::new(args.program.clone(), start, end, args.resolution);
    let computation = client
        .execute_request(request)
        .await
        .context("failed to start computation")?;

    println!("Computation started, collecting data...");
    let collected = computation.collect().await;
    if let Some(resolution) = computation.resolution_ms() {
        tracing::debug!("Service ran the computation at {} ms resolution", resolution);
    }
    computation.close().await;

    collected.context("error during data collection")
}

fn print_result(result: &CollectedResult, points: bool) {
    if result.is_empty() {
        println!("No data points received");
        return;
    }
    println!("Collected data for {} time series", result.len());

    for tsid in result.tsids() {
        let Some(series) = result.get(tsid) else {
            continue;
        };
        println!();
        match series.metric() {
            Some(metric) => println!("Time Series: {} ({})", tsid, metric),
            None => println!("Time Series: {}", tsid),
        }
        println!("  Data points: {}", series.len());

        if let (Some(first), Some(last)) = (series.first(), series.last()) {
            println!(
                "  Time range: {} to {}",
                iso(first.timestamp),
                iso(last.timestamp)
            );
            println!("  First value: {}, Last value: {}", first.value, last.value);
        }
        if points {
            for point in &series.points {
                println!("    {}: {}", iso(point.timestamp), point.value);
            }
        }
    }
}

fn iso(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(1_800_000, 30).unwrap(), 0);
        assert!(window_start(0, i64::MAX).is_err());
        assert!(window_start(i64::MIN, 1).is_err());
    }

    #[test]
    fn test_window_argument_is_bounded() {
        assert!(Args::try_parse_from(["signalflow-run", "-w", "60"]).is_ok());
        assert!(Args::try_parse_from(["signalflow-run", "-w", "0"]).is_err());
        assert!(Args::try_parse_from(["signalflow-run", "-w", "9223372036854775807"]).is_err());
    }
}
