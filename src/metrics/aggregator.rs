//! Interval aggregator: buckets metric samples into fixed `interval`
//! windows anchored at the first observed timestamp, and emits a formatted
//! report for each bucket once it is known to be complete.
//!
//! Add-samples and flush-evaluation run sequentially on the aggregator's own
//! thread rather than on separate worker threads — nothing externally
//! observable depends on the two steps overlapping, and keeping them on one
//! thread avoids a second join point for no benefit.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::component::{Component, StopFlag};
use crate::errors::PipelineError;
use crate::metrics::{Metric, MetricSample};

fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub struct IntervalAggregator {
    input_rx: Option<Receiver<Vec<Option<MetricSample>>>>,
    interval: i64,
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    stop_flag: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalAggregator {
    pub fn new(
        input_rx: Receiver<Vec<Option<MetricSample>>>,
        interval: i64,
        sink: Arc<Mutex<Box<dyn Write + Send>>>,
    ) -> Self {
        Self {
            input_rx: Some(input_rx),
            interval,
            sink,
            stop_flag: Arc::new(StopFlag::new()),
            handle: None,
        }
    }
}

struct Engine {
    interval: i64,
    first_sampled_ts: Option<i64>,
    last_flushed_ts: i64,
    buckets: HashMap<i64, HashMap<String, Metric>>,
}

impl Engine {
    fn new(interval: i64) -> Self {
        Self {
            interval,
            first_sampled_ts: None,
            last_flushed_ts: 0,
            buckets: HashMap::new(),
        }
    }

    fn bucket_of(&mut self, ts: i64) -> i64 {
        if self.first_sampled_ts.is_none() {
            self.first_sampled_ts = Some(ts);
            self.last_flushed_ts = ts;
        }
        (ts - self.first_sampled_ts.unwrap()) / self.interval
    }

    fn add_samples(&mut self, batch: &[Option<MetricSample>]) {
        for sample in batch.iter().flatten() {
            let bucket = self.bucket_of(sample.event_ts);
            self.buckets
                .entry(bucket)
                .or_default()
                .entry(sample.name.clone())
                .or_insert_with(Metric::new_count)
                .add_sample(sample);
        }
    }

    /// Returns the rendered report, if the bucket just completed had any
    /// sampled metrics.
    fn flush(&mut self, timestamp: i64) -> Option<String> {
        if timestamp < self.last_flushed_ts + self.interval {
            return None;
        }
        let interval_start = self.last_flushed_ts;
        let interval_end = interval_start + self.interval;
        self.last_flushed_ts = interval_end;

        let completed_bucket = self.bucket_of(timestamp) - 1;
        let mut metrics_by_name = self.buckets.remove(&completed_bucket)?;
        if metrics_by_name.is_empty() {
            return None;
        }

        let mut lines = Vec::new();
        for (name, metric) in metrics_by_name.iter_mut() {
            match metric.flush(timestamp) {
                Ok(mut computed) => {
                    computed.name = name.clone();
                    let mut rendered = String::new();
                    computed.render(&mut rendered);
                    lines.push(rendered);
                }
                Err(e) => {
                    warn!("[IntervalAggregator] error flushing metric {}: {}", name, e);
                }
            }
        }
        if lines.is_empty() {
            return None;
        }

        let mut report = format!(
            "[{}] Statistics for time interval {}-{}\n",
            format_ts(timestamp),
            format_ts(interval_start),
            format_ts(interval_end)
        );
        for line in lines {
            report.push_str(&line);
            report.push('\n');
        }
        report.push('\n');
        Some(report)
    }
}

impl Component for IntervalAggregator {
    fn start(&mut self) -> Result<(), PipelineError> {
        let input_rx = self
            .input_rx
            .take()
            .expect("IntervalAggregator::start called twice");
        let interval = self.interval;
        let sink = self.sink.clone();
        let stop_flag = self.stop_flag.clone();

        info!("[IntervalAggregator] starting with interval {}s", interval);
        self.handle = Some(thread::spawn(move || {
            let mut engine = Engine::new(interval);
            for batch in input_rx.iter() {
                if batch.is_empty() {
                    continue;
                }
                let timestamp = batch.iter().flatten().next().map(|s| s.event_ts);
                engine.add_samples(&batch);
                if let Some(ts) = timestamp {
                    if let Some(report) = engine.flush(ts) {
                        let mut sink = sink.lock();
                        if sink.write_all(report.as_bytes()).is_err() {
                            debug!("[IntervalAggregator] sink write failed");
                        }
                    }
                }
            }
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

impl Drop for IntervalAggregator {
    fn drop(&mut self) {
        self.join();
    }
}
