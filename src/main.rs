//! CLI entry point: wires the default request-count metric and a single
//! high-traffic window monitor, then drives the pipeline to completion.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;
use parking_lot::Mutex;

use logpulse::logs::transform::csv_access_log;
use logpulse::logs::LogFilter;
use logpulse::metrics::CustomMetricSpec;
use logpulse::monitors::LogMonitorConfig;
use logpulse::service::{Service, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "logpulse", about = "Streaming access-log statistics and alerting")]
struct Cli {
    /// Input access-log file.
    #[arg(short, long)]
    file: PathBuf,

    /// Interval aggregator bucket width, in seconds.
    #[arg(short, long, default_value_t = 10)]
    interval: i64,

    /// Requests-per-second threshold; the default monitor's alert and
    /// recovery thresholds are `window * threshold`.
    #[arg(short, long, default_value_t = 10)]
    threshold: i64,

    /// Monitor sliding-window width, in seconds.
    #[arg(short, long, default_value_t = 120)]
    window: i64,
}

fn render_ctx(value: i64, time: i64) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    ctx.insert("value".to_string(), value.to_string());
    ctx.insert("time".to_string(), time.to_string());
    ctx
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let stats_sink: Arc<Mutex<Box<dyn io::Write + Send>>> =
        Arc::new(Mutex::new(Box::new(io::stdout())));
    let alert_sink: Arc<Mutex<Box<dyn io::Write + Send>>> =
        Arc::new(Mutex::new(Box::new(io::stdout())));

    let threshold = cli.window * cli.threshold;
    let monitor_config = LogMonitorConfig {
        name: "high-traffic".to_string(),
        time_window: cli.window,
        filter: LogFilter::new("*").expect("'*' is always a valid filter"),
        alert_threshold: threshold,
        alert_template: "High traffic generated an alert - hits {{value}}, triggered at {{time}}"
            .to_string(),
        alert_ctx_fn: Arc::new(render_ctx),
        recovery_threshold: threshold,
        recovery_template: Some("Recovered from high traffic at time {{time}}".to_string()),
        recovery_ctx_fn: None,
    };

    let total_traffic = CustomMetricSpec::new(
        "total_traffic",
        LogFilter::new("*").expect("'*' is always a valid filter"),
        cli.interval,
    );

    let config = ServiceConfig {
        file_path: cli.file,
        interval: cli.interval,
        transform: Arc::new(csv_access_log),
        custom_metrics: vec![total_traffic],
        monitor_configs: vec![monitor_config],
        stats_sink,
        alert_sink,
    };

    let mut service = match Service::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to build service: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = service.start() {
        error!("failed to start service: {e}");
        return ExitCode::FAILURE;
    }

    service.wait();
    if service.failed() {
        error!("reader stopped on a fatal I/O error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
