//! Window monitor: a single `CustomMetricSpec` evaluated over a sliding
//! window, raising and clearing an alert by rendering mustache templates
//! on each transition.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, info};
use mustache::Template;
use parking_lot::Mutex;

use crate::component::{Component, StopFlag};
use crate::errors::PipelineError;
use crate::logs::{LogFilter, ProcessedLog};
use crate::metrics::{CustomMetricSpec, Metric};

/// Builds the mustache render context (at minimum `{{value}}`/`{{time}}`)
/// from the value and timestamp at the moment of a transition.
pub type ContextFn = Arc<dyn Fn(i64, i64) -> HashMap<String, String> + Send + Sync>;

pub struct LogMonitorConfig {
    pub name: String,
    pub time_window: i64,
    pub filter: LogFilter,
    pub alert_threshold: i64,
    pub alert_template: String,
    pub alert_ctx_fn: ContextFn,
    pub recovery_threshold: i64,
    pub recovery_template: Option<String>,
    pub recovery_ctx_fn: Option<ContextFn>,
}

/// Input channel capacity for monitors: buffered so a slow monitor never
/// stalls the router's synchronous fan-out.
const MONITOR_INPUT_CAPACITY: usize = 100;

pub struct WindowMonitor {
    name: String,
    input_tx: Option<Sender<ProcessedLog>>,
    input_rx: Option<Receiver<ProcessedLog>>,
    spec: Arc<CustomMetricSpec>,
    time_window: i64,
    alert_threshold: i64,
    alert_template: Template,
    alert_ctx_fn: ContextFn,
    recovery_threshold: i64,
    recovery_template: Template,
    recovery_ctx_fn: ContextFn,
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    stop_flag: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

impl WindowMonitor {
    pub fn new(
        config: LogMonitorConfig,
        sink: Arc<Mutex<Box<dyn Write + Send>>>,
    ) -> Result<Self, PipelineError> {
        let alert_template = mustache::compile_str(&config.alert_template)
            .map_err(|e| PipelineError::TemplateParse(e.to_string()))?;

        let recovery_template_str = config
            .recovery_template
            .clone()
            .unwrap_or_else(|| format!("[RECOVERED] {}", config.alert_template));
        let recovery_template = mustache::compile_str(&recovery_template_str)
            .map_err(|e| PipelineError::TemplateParse(e.to_string()))?;

        let recovery_ctx_fn = config
            .recovery_ctx_fn
            .clone()
            .unwrap_or_else(|| config.alert_ctx_fn.clone());

        let (input_tx, input_rx) = bounded(MONITOR_INPUT_CAPACITY);
        let spec = CustomMetricSpec::new(config.name.clone(), config.filter, config.time_window);

        Ok(Self {
            name: config.name,
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            spec: Arc::new(spec),
            time_window: config.time_window,
            alert_threshold: config.alert_threshold,
            alert_template,
            alert_ctx_fn: config.alert_ctx_fn,
            recovery_threshold: config.recovery_threshold,
            recovery_template,
            recovery_ctx_fn,
            sink,
            stop_flag: Arc::new(StopFlag::new()),
            handle: None,
        })
    }

    /// Hands the sole `Sender` half to the caller (the router, during
    /// wiring). The monitor retains no clone of its own, so the channel
    /// closes cleanly once the router drops this sender on shutdown.
    /// Must be called exactly once, before `start`.
    pub fn take_input(&mut self) -> Sender<ProcessedLog> {
        self.input_tx
            .take()
            .expect("WindowMonitor::take_input called twice")
    }
}

impl Component for WindowMonitor {
    fn start(&mut self) -> Result<(), PipelineError> {
        let input_rx = self
            .input_rx
            .take()
            .expect("WindowMonitor::start called twice");
        let spec = self.spec.clone();
        let time_window = self.time_window;
        let alert_threshold = self.alert_threshold;
        let alert_template = self.alert_template.clone();
        let alert_ctx_fn = self.alert_ctx_fn.clone();
        let recovery_threshold = self.recovery_threshold;
        let recovery_template = self.recovery_template.clone();
        let recovery_ctx_fn = self.recovery_ctx_fn.clone();
        let sink = self.sink.clone();
        let stop_flag = self.stop_flag.clone();
        let name = self.name.clone();

        info!("[WindowMonitor:{}] starting (window={}s)", name, time_window);
        self.handle = Some(thread::spawn(move || {
            let mut metric = Metric::new_window(time_window);
            let mut in_alert = false;
            let mut last_checked_ts = 0i64;

            for log in input_rx.iter() {
                let timestamp = log.event_ts;
                let mut should_flush = timestamp > last_checked_ts;

                if let Some(sample) = spec.compute(&log) {
                    metric.add_sample(&sample);
                    should_flush = true;
                }

                if !should_flush {
                    continue;
                }
                last_checked_ts = timestamp;

                let computed = match metric.flush(timestamp) {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                let value = match computed.get_value(None) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                if value > alert_threshold && !in_alert {
                    in_alert = true;
                    let ctx = alert_ctx_fn(value, timestamp);
                    if let Ok(rendered) = alert_template.render_to_string(&ctx) {
                        let mut sink = sink.lock();
                        let _ = writeln!(sink, "{}", rendered);
                    }
                } else if value <= recovery_threshold && in_alert {
                    in_alert = false;
                    let ctx = recovery_ctx_fn(value, timestamp);
                    if let Ok(rendered) = recovery_template.render_to_string(&ctx) {
                        let mut sink = sink.lock();
                        let _ = writeln!(sink, "{}", rendered);
                    }
                }
            }
            debug!("[WindowMonitor:{}] input closed, stopping", name);
            stop_flag.mark_stopped();
        }));
        Ok(())
    }

    fn stop(&self) {}

    fn is_stopped(&self) -> bool {
        self.stop_flag.is_stopped()
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WindowMonitor {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::AttrValue;
    use std::collections::HashMap as Map;

    fn ctx_fn() -> ContextFn {
        Arc::new(|value, time| {
            let mut ctx = HashMap::new();
            ctx.insert("value".to_string(), value.to_string());
            ctx.insert("time".to_string(), time.to_string());
            ctx
        })
    }

    fn config(window: i64, alert: i64, recovery: i64) -> LogMonitorConfig {
        LogMonitorConfig {
            name: "high-traffic".into(),
            time_window: window,
            filter: LogFilter::new("*").unwrap(),
            alert_threshold: alert,
            alert_template: "High traffic generated an alert - hits {{value}}, triggered at {{time}}".into(),
            alert_ctx_fn: ctx_fn(),
            recovery_threshold: recovery,
            recovery_template: Some("Recovered from high traffic at time {{time}}".into()),
            recovery_ctx_fn: None,
        }
    }

    fn log_at(ts: i64) -> ProcessedLog {
        let mut attrs = Map::new();
        attrs.insert("placeholder".into(), AttrValue::Leaf("1".into()));
        ProcessedLog {
            event_ts: ts,
            attributes: attrs,
            ..Default::default()
        }
    }

    fn buf_sink() -> (Arc<Mutex<Box<dyn Write + Send>>>, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let reader = buf.clone();
        let sink: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(BufMirror(buf))));
        (sink, reader)
    }

    struct BufMirror(Arc<Mutex<Vec<u8>>>);
    impl Write for BufMirror {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn recovery_template_defaults_to_prefixed_alert_template() {
        let mut cfg = config(2, 2, 2);
        cfg.recovery_template = None;
        let (sink, _) = buf_sink();
        let monitor = WindowMonitor::new(cfg, sink).unwrap();
        let rendered = monitor
            .recovery_template
            .render_to_string(&HashMap::<String, String>::new())
            .unwrap();
        assert!(rendered.starts_with("[RECOVERED] "));
    }

    #[test]
    fn bad_template_is_rejected_at_construction() {
        let mut cfg = config(2, 2, 2);
        cfg.alert_template = "{{unterminated".into();
        let (sink, _) = buf_sink();
        assert!(WindowMonitor::new(cfg, sink).is_err());
    }

    #[test]
    fn scenario_s1_alert_recover_alert_recover() {
        // S1: 100,101,101,102,103,105,106,106,108,109 ; W=2 A=2 R=2
        let cfg = config(2, 2, 2);
        let (sink, buf) = buf_sink();
        let mut monitor = WindowMonitor::new(cfg, sink).unwrap();
        let tx = monitor.take_input();
        monitor.start().unwrap();
        for ts in [100, 101, 101, 102, 103, 105, 106, 106, 108, 109] {
            tx.send(log_at(ts)).unwrap();
        }
        drop(tx);
        drop(monitor);

        let output = String::from_utf8(buf.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "High traffic generated an alert - hits 3, triggered at 101",
                "Recovered from high traffic at time 105",
                "High traffic generated an alert - hits 3, triggered at 106",
                "Recovered from high traffic at time 109",
            ]
        );
    }
}
