//! Metrics pipeline: turns each `ProcessedLog` into a batch of
//! `Option<MetricSample>`, one slot per configured `CustomMetricSpec`, and
//! the metric accumulators those samples feed.

pub mod aggregator;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};
use log::info;

use crate::component::{Component, StopFlag};
use crate::errors::PipelineError;
use crate::logs::{LogFilter, LogMeasure, ProcessedLog};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub name: String,
    pub tags: Vec<Tag>,
    pub value: i64,
    pub event_ts: i64,
}

/// The rendered result of one metric's flush. Group order is not
/// meaningful: two `ComputedMetric`s with the same groups in different
/// orders are equal.
#[derive(Debug, Clone)]
pub struct ComputedMetric {
    pub name: String,
    pub event_ts: i64,
    pub value: i64,
    pub groups: Vec<ComputedMetric>,
}

impl PartialEq for ComputedMetric {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.event_ts != other.event_ts
            || self.value != other.value
            || self.groups.len() != other.groups.len()
        {
            return false;
        }
        self.groups
            .iter()
            .all(|g| other.groups.iter().any(|og| g == og))
    }
}

impl ComputedMetric {
    pub fn render(&self, buf: &mut String) {
        use std::fmt::Write as _;
        let _ = write!(buf, "Metric {} count: {}", self.name, self.value);
        for group in &self.groups {
            let _ = write!(buf, "\n\tWith tag name {}: {}", group.name, group.value);
            for sub in &group.groups {
                let _ = write!(buf, "\n\t\tWith tag name {}: {}", sub.name, sub.value);
            }
        }
    }

    /// `tag == None` returns the metric's overall value. `Some(tag)` with an
    /// empty value returns the per-tag-name group total; a non-empty value
    /// drills down to that specific tag value's count.
    pub fn get_value(&self, tag: Option<&Tag>) -> Result<i64, PipelineError> {
        let tag = match tag {
            None => return Ok(self.value),
            Some(t) => t,
        };
        for group in &self.groups {
            if group.name == tag.name {
                if tag.value.is_empty() {
                    return Ok(group.value);
                }
                for sub in &group.groups {
                    if sub.name == tag.value {
                        return Ok(sub.value);
                    }
                }
            }
        }
        Err(PipelineError::CouldNotComputeMetricForTag {
            name: tag.name.clone(),
            value: tag.value.clone(),
        })
    }
}

/// Monotonic counter, reset to zero on every flush.
#[derive(Debug, Default, Clone)]
pub struct CountAccumulator {
    value: i64,
}

impl CountAccumulator {
    pub fn add_sample(&mut self, value: i64) {
        self.value += value;
    }

    pub fn flush(&mut self) -> i64 {
        std::mem::take(&mut self.value)
    }
}

/// Ordered `(event_ts, value)` entries with a running sum. Flushing at `t`
/// discards entries older than `t - window`, without clearing the rest.
#[derive(Debug, Clone)]
pub struct WindowedCountAccumulator {
    window: i64,
    samples: VecDeque<(i64, i64)>,
    value: i64,
}

impl WindowedCountAccumulator {
    pub fn new(window: i64) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            value: 0,
        }
    }

    pub fn add_sample(&mut self, event_ts: i64, value: i64) {
        self.samples.push_back((event_ts, value));
        self.value += value;
    }

    pub fn flush(&mut self, timestamp: i64) -> i64 {
        let cutoff = timestamp - self.window;
        while let Some(&(ts, v)) = self.samples.front() {
            if ts >= cutoff {
                break;
            }
            self.value -= v;
            self.samples.pop_front();
        }
        self.value
    }
}

#[derive(Debug, Default)]
struct CountMetricState {
    value: Option<CountAccumulator>,
    values: HashMap<String, HashMap<String, CountAccumulator>>,
}

impl CountMetricState {
    fn add_sample(&mut self, sample: &MetricSample) {
        self.value.get_or_insert_with(CountAccumulator::default).add_sample(sample.value);
        for tag in &sample.tags {
            self.values
                .entry(tag.name.clone())
                .or_default()
                .entry(tag.value.clone())
                .or_default()
                .add_sample(sample.value);
        }
    }

    fn flush(&mut self, timestamp: i64) -> Result<ComputedMetric, PipelineError> {
        let value = self
            .value
            .as_mut()
            .ok_or(PipelineError::UnsampledMetric)?
            .flush();
        let groups = flush_tag_groups(&mut self.values, timestamp, |c| c.flush());
        Ok(ComputedMetric {
            name: String::new(),
            event_ts: timestamp,
            value,
            groups,
        })
    }
}

#[derive(Debug)]
struct WindowMetricState {
    window: i64,
    value: Option<WindowedCountAccumulator>,
    values: HashMap<String, HashMap<String, WindowedCountAccumulator>>,
}

impl WindowMetricState {
    fn new(window: i64) -> Self {
        Self {
            window,
            value: None,
            values: HashMap::new(),
        }
    }

    fn add_sample(&mut self, sample: &MetricSample) {
        let window = self.window;
        self.value
            .get_or_insert_with(|| WindowedCountAccumulator::new(window))
            .add_sample(sample.event_ts, sample.value);
        for tag in &sample.tags {
            self.values
                .entry(tag.name.clone())
                .or_default()
                .entry(tag.value.clone())
                .or_insert_with(|| WindowedCountAccumulator::new(window))
                .add_sample(sample.event_ts, sample.value);
        }
    }

    fn flush(&mut self, timestamp: i64) -> Result<ComputedMetric, PipelineError> {
        let value = self
            .value
            .as_mut()
            .ok_or(PipelineError::UnsampledMetric)?
            .flush(timestamp);
        let groups = flush_tag_groups(&mut self.values, timestamp, |c| c.flush(timestamp));
        Ok(ComputedMetric {
            name: String::new(),
            event_ts: timestamp,
            value,
            groups,
        })
    }
}

fn flush_tag_groups<C>(
    values: &mut HashMap<String, HashMap<String, C>>,
    timestamp: i64,
    mut flush_one: impl FnMut(&mut C) -> i64,
) -> Vec<ComputedMetric> {
    values
        .iter_mut()
        .map(|(tag_name, by_value)| {
            let mut group_value = 0;
            let sub_groups: Vec<ComputedMetric> = by_value
                .iter_mut()
                .map(|(tag_value, counter)| {
                    let val = flush_one(counter);
                    group_value += val;
                    ComputedMetric {
                        name: tag_value.clone(),
                        event_ts: timestamp,
                        value: val,
                        groups: Vec::new(),
                    }
                })
                .collect();
            ComputedMetric {
                name: tag_name.clone(),
                event_ts: timestamp,
                value: group_value,
                groups: sub_groups,
            }
        })
        .collect()
}

/// The only two metric implementations the source has: a closed sum type
/// is a better fit than a trait object for this crate's scale.
pub enum Metric {
    Count(CountMetricState),
    Window(WindowMetricState),
}

impl Metric {
    pub fn new_count() -> Self {
        Metric::Count(CountMetricState::default())
    }

    pub fn new_window(window: i64) -> Self {
        Metric::Window(WindowMetricState::new(window))
    }

    pub fn add_sample(&mut self, sample: &MetricSample) {
        match self {
            Metric::Count(s) => s.add_sample(sample),
            Metric::Window(s) => s.add_sample(sample),
        }
    }

    pub fn flush(&mut self, timestamp: i64) -> Result<ComputedMetric, PipelineError> {
        match self {
            Metric::Count(s) => s.flush(timestamp),
            Metric::Window(s) => s.flush(timestamp),
        }
    }
}

/// A single aggregate the metrics pipeline knows how to compute: a filter
/// (which logs count), an optional measure (default count-of-1), an
/// optional group-by attribute list, and the time window used only by
/// window-style consumers (monitors) — the fixed-bucket aggregator ignores
/// it and uses its own global interval instead.
pub struct CustomMetricSpec {
    pub name: String,
    pub filter: LogFilter,
    pub measure: Option<LogMeasure>,
    pub group_by: Vec<String>,
    pub time_window: i64,
}

impl CustomMetricSpec {
    pub fn new(name: impl Into<String>, filter: LogFilter, time_window: i64) -> Self {
        Self {
            name: name.into(),
            filter,
            measure: None,
            group_by: Vec::new(),
            time_window,
        }
    }

    pub fn with_measure(mut self, measure: LogMeasure) -> Self {
        self.measure = Some(measure);
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<String>) -> Self {
        self.group_by = group_by;
        self
    }

    /// Returns `None` if the log is filtered out, or if a configured
    /// measure can't be resolved against it. Unresolved group-by keys are
    /// skipped rather than failing the whole sample.
    pub fn compute(&self, log: &ProcessedLog) -> Option<MetricSample> {
        if !self.filter.matches(log) {
            return None;
        }
        let value = match &self.measure {
            None => 1,
            Some(measure) => measure.measure(log)?,
        };
        let tags = self
            .group_by
            .iter()
            .filter_map(|attr| {
                log.get_attribute(attr).map(|value| Tag {
                    name: attr.clone(),
                    value,
                })
            })
            .collect();
        Some(MetricSample {
            name: self.name.clone(),
            tags,
            value,
            event_ts: log.event_ts,
        })
    }
}

/// For every log on the input channel, evaluates all configured specs and
/// emits one `Vec<Option<MetricSample>>` batch, preserving each spec's slot
/// so downstream aggregation can line samples back up with their shared
/// `event_ts`.
pub struct MetricsPipeline {
    input_rx: Option<Receiver<ProcessedLog>>,
    output_tx: Option<Sender<Vec<Option<MetricSample>>>>,
    specs: Arc<Vec<CustomMetricSpec>>,
    stop_flag: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsPipeline {
    pub fn new(
        input_rx: Receiver<ProcessedLog>,
        output_tx: Sender<Vec<Option<MetricSample>>>,
        specs: Vec<CustomMetricSpec>,
    ) -> Self {
        Self {
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            specs: Arc::new(specs),
            stop_flag: Arc::new(StopFlag::new()),
            handle: None,
        }
    }
}

impl Component for MetricsPipeline {
    fn start(&mut self) -> Result<(), PipelineError> {
        let input_rx = self
            .input_rx
            .take()
            .expect("MetricsPipeline::start called twice");
        let output_tx = self
            .output_tx
            .take()
            .expect("MetricsPipeline::start called twice");
        let specs = self.specs.clone();
        let stop_flag = self.stop_flag.clone();

        info!("[MetricsPipeline] starting with {} spec(s)", specs.len());
        self.handle = Some(thread::spawn(move || {
            for log in input_rx.iter() {
                let batch: Vec<Option<MetricSample>> =
                    specs.iter().map(|spec| spec.compute(&log)).collect();
                if output_tx.send(batch).is_err() {
                    break;
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

impl Drop for MetricsPipeline {
    fn drop(&mut self) {
        self.join();
    }
}
