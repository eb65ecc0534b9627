//! Fan-out router: broadcasts every `ProcessedLog` to the metrics pipeline
//! and to every window monitor, synchronously — the next input is only
//! accepted once all downstream sends have completed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};
use log::info;

use crate::component::{Component, StopFlag};
use crate::errors::PipelineError;
use crate::logs::ProcessedLog;

pub struct Router {
    input_rx: Option<Receiver<ProcessedLog>>,
    metrics_tx: Option<Sender<ProcessedLog>>,
    monitor_txs: Vec<Sender<ProcessedLog>>,
    stop_flag: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

impl Router {
    pub fn new(
        input_rx: Receiver<ProcessedLog>,
        metrics_tx: Sender<ProcessedLog>,
        monitor_txs: Vec<Sender<ProcessedLog>>,
    ) -> Self {
        Self {
            input_rx: Some(input_rx),
            metrics_tx: Some(metrics_tx),
            monitor_txs,
            stop_flag: Arc::new(StopFlag::new()),
            handle: None,
        }
    }
}

impl Component for Router {
    fn start(&mut self) -> Result<(), PipelineError> {
        let input_rx = self.input_rx.take().expect("Router::start called twice");
        let metrics_tx = self.metrics_tx.take().expect("Router::start called twice");
        let monitor_txs = std::mem::take(&mut self.monitor_txs);
        let stop_flag = self.stop_flag.clone();

        info!("[Router] starting, fanning out to {} monitor(s)", monitor_txs.len());
        self.handle = Some(thread::spawn(move || {
            for log in input_rx.iter() {
                thread::scope(|scope| {
                    scope.spawn(|| {
                        let _ = metrics_tx.send(log.clone());
                    });
                    for tx in &monitor_txs {
                        scope.spawn(|| {
                            let _ = tx.send(log.clone());
                        });
                    }
                });
            }
            // Dropping metrics_tx/monitor_txs here closes every downstream
            // channel, propagating the upstream close.
            stop_flag.mark_stopped();
        }));
        Ok(())
    }

    fn stop(&self) {
        // No stop channel of its own: closure propagates from upstream.
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag.is_stopped()
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.join();
    }
}
