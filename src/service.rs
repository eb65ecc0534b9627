//! Service orchestrator: wires the reader, processor, router, metrics
//! pipeline, aggregator, and monitors together, starts them
//! sinks-first/sources-last, and exposes a single `stop`/`wait`/`is_stopped`
//! surface over the whole pipeline.

use std::io::Write;
use std::sync::Arc;

use crossbeam::channel::{bounded, unbounded};
use log::info;
use parking_lot::Mutex;

use crate::component::Component;
use crate::errors::PipelineError;
use crate::input::{FileReader, RawMessage};
use crate::logs::ProcessedLog;
use crate::metrics::aggregator::IntervalAggregator;
use crate::metrics::{CustomMetricSpec, MetricsPipeline};
use crate::monitors::{LogMonitorConfig, WindowMonitor};
use crate::processor::{LogProcessor, Transform};
use crate::router::Router;

pub struct ServiceConfig {
    pub file_path: std::path::PathBuf,
    pub interval: i64,
    pub transform: Arc<Transform>,
    pub custom_metrics: Vec<CustomMetricSpec>,
    pub monitor_configs: Vec<LogMonitorConfig>,
    pub stats_sink: Arc<Mutex<Box<dyn Write + Send>>>,
    pub alert_sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

pub struct Service {
    reader: FileReader,
    processor: LogProcessor,
    router: Router,
    metrics_pipeline: MetricsPipeline,
    monitors: Vec<WindowMonitor>,
    aggregator: IntervalAggregator,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Result<Self, PipelineError> {
        let (raw_tx, raw_rx) = bounded::<RawMessage>(0);
        let (log_tx, log_rx) = bounded::<ProcessedLog>(0);
        let (metrics_tx, metrics_rx) = bounded::<ProcessedLog>(0);
        let (samples_tx, samples_rx) = unbounded();

        let mut monitors = Vec::with_capacity(config.monitor_configs.len());
        let mut monitor_txs = Vec::with_capacity(config.monitor_configs.len());
        for monitor_config in config.monitor_configs {
            let mut monitor = WindowMonitor::new(monitor_config, config.alert_sink.clone())?;
            monitor_txs.push(monitor.take_input());
            monitors.push(monitor);
        }

        let reader = FileReader::new(config.file_path, raw_tx);
        let processor = LogProcessor::new(raw_rx, log_tx, config.transform);
        let router = Router::new(log_rx, metrics_tx, monitor_txs);
        let metrics_pipeline = MetricsPipeline::new(metrics_rx, samples_tx, config.custom_metrics);
        let aggregator = IntervalAggregator::new(samples_rx, config.interval, config.stats_sink);

        Ok(Self {
            reader,
            processor,
            router,
            metrics_pipeline,
            monitors,
            aggregator,
        })
    }

    /// Starts every stage sinks-first / sources-last so no producer ever
    /// blocks sending to a consumer that hasn't started receiving yet.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        info!("[Service] starting");
        self.aggregator.start()?;
        self.metrics_pipeline.start()?;
        for monitor in &mut self.monitors {
            monitor.start()?;
        }
        self.router.start()?;
        self.processor.start()?;
        self.reader.start()?;
        Ok(())
    }

    /// Closes the reader's input; closure cascades downstream through every
    /// stage's EOF-equivalent channel-close handling.
    pub fn stop(&self) {
        self.reader.stop();
    }

    /// Blocks until every stage's worker thread has exited, in pipeline
    /// order. Each stage only finishes after the one upstream of it closes,
    /// so this never spins: each `join` call parks until its predecessor is
    /// already done.
    pub fn wait(&mut self) {
        self.reader.join();
        self.processor.join();
        self.router.join();
        self.metrics_pipeline.join();
        for monitor in &mut self.monitors {
            monitor.join();
        }
        self.aggregator.join();
        info!("[Service] stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.reader.is_stopped()
            && self.processor.is_stopped()
            && self.router.is_stopped()
            && self.metrics_pipeline.is_stopped()
            && self.monitors.iter().all(|m| m.is_stopped())
            && self.aggregator.is_stopped()
    }

    /// True if the reader stopped because of a fatal I/O error (an over-long
    /// line or a read failure) rather than a clean EOF or an explicit stop.
    /// Only meaningful after `wait()` returns.
    pub fn failed(&self) -> bool {
        self.reader.failed()
    }
}
