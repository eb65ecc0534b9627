//! End-to-end tests: drive a real `Service` against a scratch file and an
//! in-memory sink, with no mocked stages.

use std::io::Write as _;
use std::sync::Arc;

use logpulse::logs::transform::csv_access_log;
use logpulse::logs::LogFilter;
use logpulse::metrics::CustomMetricSpec;
use logpulse::monitors::LogMonitorConfig;
use logpulse::service::{Service, ServiceConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use tempfile::NamedTempFile;

fn line(host: &str, ts: i64, path: &str, status: &str) -> String {
    format!(
        "\"{host}\",\"-\",\"apache\",{ts},\"GET {path} HTTP/1.0\",{status},1234\n"
    )
}

struct MirrorSink(Arc<Mutex<Vec<u8>>>);
impl std::io::Write for MirrorSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn sink() -> (Arc<Mutex<Box<dyn std::io::Write + Send>>>, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let boxed: Arc<Mutex<Box<dyn std::io::Write + Send>>> =
        Arc::new(Mutex::new(Box::new(MirrorSink(buf.clone()))));
    (boxed, buf)
}

fn render_ctx(value: i64, time: i64) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    ctx.insert("value".to_string(), value.to_string());
    ctx.insert("time".to_string(), time.to_string());
    ctx
}

fn write_lines(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for l in lines {
        file.write_all(l.as_bytes()).unwrap();
    }
    file.flush().unwrap();
    file
}

fn default_monitor_config(window: i64, alert: i64, recovery: i64) -> LogMonitorConfig {
    LogMonitorConfig {
        name: "high-traffic".into(),
        time_window: window,
        filter: LogFilter::new("*").unwrap(),
        alert_threshold: alert,
        alert_template: "High traffic generated an alert - hits {{value}}, triggered at {{time}}"
            .into(),
        alert_ctx_fn: Arc::new(render_ctx),
        recovery_threshold: recovery,
        recovery_template: Some("Recovered from high traffic at time {{time}}".into()),
        recovery_ctx_fn: None,
    }
}

fn run_service(
    path: &std::path::Path,
    interval: i64,
    monitor_configs: Vec<LogMonitorConfig>,
) -> (String, String) {
    let (stats_sink, stats_buf) = sink();
    let (alert_sink, alert_buf) = sink();

    let total_traffic =
        CustomMetricSpec::new("total_traffic", LogFilter::new("*").unwrap(), interval);

    let config = ServiceConfig {
        file_path: path.to_path_buf(),
        interval,
        transform: Arc::new(csv_access_log),
        custom_metrics: vec![total_traffic],
        monitor_configs,
        stats_sink,
        alert_sink,
    };

    let mut service = Service::new(config).unwrap();
    service.start().unwrap();
    service.wait();
    assert!(service.is_stopped());

    let stats = String::from_utf8(stats_buf.lock().clone()).unwrap();
    let alerts = String::from_utf8(alert_buf.lock().clone()).unwrap();
    (stats, alerts)
}

#[test]
fn empty_file_produces_no_output_and_exits_cleanly() {
    let file = write_lines(&[]);
    let (stats, alerts) = run_service(file.path(), 2, vec![default_monitor_config(2, 2, 2)]);
    assert!(stats.is_empty());
    assert!(alerts.is_empty());
}

#[test]
fn header_only_file_produces_no_output() {
    let header =
        "\"remotehost\",\"rfc931\",\"authuser\",\"date\",\"request\",\"status\",\"bytes\"\n"
            .to_string();
    let file = write_lines(&[header]);
    let (stats, alerts) = run_service(file.path(), 2, vec![default_monitor_config(2, 2, 2)]);
    assert!(stats.is_empty());
    assert!(alerts.is_empty());
}

#[test]
fn scenario_s1_alert_recover_alert_recover_end_to_end() {
    let lines: Vec<String> = [100, 101, 101, 102, 103, 105, 106, 106, 108, 109]
        .iter()
        .map(|ts| line("10.0.0.1", *ts, "/api/user", "200"))
        .collect();
    let file = write_lines(&lines);
    let (_, alerts) = run_service(file.path(), 2, vec![default_monitor_config(2, 2, 2)]);

    let got: Vec<&str> = alerts.lines().collect();
    assert_eq!(
        got,
        vec![
            "High traffic generated an alert - hits 3, triggered at 101",
            "Recovered from high traffic at time 105",
            "High traffic generated an alert - hits 3, triggered at 106",
            "Recovered from high traffic at time 109",
        ]
    );
}

#[test]
fn scenario_s2_alert_with_no_recovery_before_eof() {
    let ts = 1_549_573_860;
    let lines: Vec<String> = (0..5)
        .map(|_| line("10.0.0.1", ts, "/api/user", "200"))
        .collect();
    let file = write_lines(&lines);
    let (_, alerts) = run_service(file.path(), 2, vec![default_monitor_config(2, 2, 2)]);

    let got: Vec<&str> = alerts.lines().collect();
    assert_eq!(
        got,
        vec![format!(
            "High traffic generated an alert - hits 5, triggered at {}",
            ts
        )]
    );
}

#[test]
fn scenario_s3_two_second_buckets_with_no_monitor_transitions() {
    let lines: Vec<String> = (1..=10)
        .map(|ts| line("10.0.0.1", ts, "/api/user", "200"))
        .collect();
    let file = write_lines(&lines);
    let (stats, alerts) = run_service(file.path(), 2, vec![default_monitor_config(2, 2, 2)]);

    assert!(alerts.is_empty(), "2 <= A=2 should never trigger an alert");
    let counts: Vec<&str> = stats
        .lines()
        .filter(|l| l.starts_with("Metric total_traffic"))
        .collect();
    for count_line in &counts {
        assert_eq!(*count_line, "Metric total_traffic count: 2");
    }
    assert!(!counts.is_empty());
}

#[test]
fn invariant_records_reaching_metrics_exclude_transform_rejections() {
    let mut lines = vec![line("10.0.0.1", 10, "/api/user", "200")];
    // Malformed request: rejected by the transform before it ever reaches C4.
    lines.push("\"10.0.0.1\",\"-\",\"apache\",12,\"GET\",200,1234\n".to_string());
    lines.push(line("10.0.0.1", 14, "/api/user", "200"));
    // Forces the bucket holding the two valid records above to flush; its
    // own bucket (I=10) never flushes before EOF, so it contributes nothing.
    lines.push(line("10.0.0.1", 20, "/api/user", "200"));
    let file = write_lines(&lines);
    let (stats, _) = run_service(file.path(), 10, vec![]);

    let counts: Vec<i64> = stats
        .lines()
        .filter_map(|l| l.strip_prefix("Metric total_traffic count: "))
        .filter_map(|v| v.parse().ok())
        .collect();
    assert_eq!(counts.iter().sum::<i64>(), 2);
}

#[test]
fn invariant_sum_of_flushed_counts_equals_total_logs() {
    let real_timestamps = [1, 3, 5, 7, 9, 11, 13];
    let mut lines: Vec<String> = real_timestamps
        .iter()
        .map(|ts| line("10.0.0.1", *ts, "/api/user", "200"))
        .collect();
    // Forces the last real bucket (ts=11,13) to flush; lands in its own
    // trailing bucket, which never flushes before EOF.
    lines.push(line("10.0.0.1", 16, "/api/user", "200"));
    let file = write_lines(&lines);
    let (stats, _) = run_service(file.path(), 5, vec![]);

    let counts: Vec<i64> = stats
        .lines()
        .filter_map(|l| l.strip_prefix("Metric total_traffic count: "))
        .filter_map(|v| v.parse().ok())
        .collect();
    assert_eq!(counts.iter().sum::<i64>(), real_timestamps.len() as i64);
}

#[test]
fn all_components_report_stopped_after_eof() {
    let lines = vec![line("10.0.0.1", 1, "/api/user", "200")];
    let file = write_lines(&lines);
    let (stats_sink, _) = sink();
    let (alert_sink, _) = sink();
    let config = ServiceConfig {
        file_path: file.path().to_path_buf(),
        interval: 5,
        transform: Arc::new(csv_access_log),
        custom_metrics: vec![CustomMetricSpec::new(
            "total_traffic",
            LogFilter::new("*").unwrap(),
            5,
        )],
        monitor_configs: vec![default_monitor_config(2, 2, 2)],
        stats_sink,
        alert_sink,
    };
    let mut service = Service::new(config).unwrap();
    service.start().unwrap();
    service.wait();
    assert!(service.is_stopped());
}
